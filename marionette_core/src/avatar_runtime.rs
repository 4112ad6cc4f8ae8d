//! Avatar Runtime - wires the engines into one per-tick loop.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        AvatarRuntime                         │
//! │  DeviceSource ─▶ AvatarDriver ─▶ PoseSampler                 │
//! │                       │               │                      │
//! │  ConfirmSource ─▶ CalibrationPipeline ─▶ BodyProfile         │
//! │                       │ events                │              │
//! │                 AvatarFactory ─▶ avatar ◀─ IkEngine          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use marionette_core::{AvatarRuntime, HardwareDriver, RigTemplate, RuntimeConfig};
//! use marionette_env::{ConfirmLatch, FlatFloor, SharedDeviceFeed, SystemContext};
//!
//! let config = RuntimeConfig::default();
//! let driver = HardwareDriver::new(config.identification.clone());
//! let mut runtime = AvatarRuntime::new(
//!     SystemContext::shared(), feed.clone(), latch.clone(),
//!     Box::new(FlatFloor::default()), RigTemplate::humanoid(), driver.into(), config,
//! );
//! runtime.on_calibration_finished(|m| println!("eyes at {}", m.eyes_height));
//! loop {
//!     runtime.tick()?;
//!     ctx.advance_frame();
//! }
//! ```

use crate::body_profile::{BodyMeasures, BodyProfile};
use crate::config::RuntimeConfig;
use crate::controller_style::ControllerStyle;
use crate::driver::AvatarDriver;
use crate::marionette_calibration::{CalibrationEvent, CalibrationPipeline, CalibrationStage, CalibrationTick};
use crate::marionette_ik::{IkEngine, IkFrame, IkFrameOutcome};
use crate::replication::CalibrationPacket;
use crate::rig::{RigSkeleton, RigTemplate};
use crate::sdf::SdfScene;
use crate::skeleton::HumanoidSkeleton;
use marionette_env::{ConfirmSource, DeviceSource, EnvError, FloorProbe, MarionetteContext};
use std::sync::Arc;
use tracing::{debug, info};

/// Spawns the avatars calibration asks for.
pub trait AvatarFactory {
    type Avatar: HumanoidSkeleton;

    /// T-pose mannequin the user steps into during ROOT_AVATAR.
    fn spawn_mannequin(&mut self, measures: &BodyMeasures) -> Self::Avatar;

    /// The avatar driven by IK once calibration is done.
    fn spawn_live(&mut self, measures: &BodyMeasures) -> Self::Avatar;
}

impl AvatarFactory for RigTemplate {
    type Avatar = RigSkeleton;

    fn spawn_mannequin(&mut self, measures: &BodyMeasures) -> RigSkeleton {
        self.build(measures.eyes_height)
    }

    fn spawn_live(&mut self, measures: &BodyMeasures) -> RigSkeleton {
        self.build(measures.eyes_height)
    }
}

/// Which avatar is currently spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarKind {
    Mannequin,
    Live,
}

/// Summary of one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub frame: u64,
    pub stage: CalibrationStage,
    pub events: Vec<CalibrationEvent>,
    /// `None` when IK did not run this tick
    pub ik: Option<IkFrameOutcome>,
}

type FinishedListener = Box<dyn FnOnce(&BodyMeasures)>;

/// One calibrated, IK-driven avatar.
pub struct AvatarRuntime<Ctx, Dev, Inp, F>
where
    Ctx: MarionetteContext,
    Dev: DeviceSource,
    Inp: ConfirmSource,
    F: AvatarFactory,
{
    context: Arc<Ctx>,
    devices: Dev,
    confirm: Inp,
    floor: Box<dyn FloorProbe>,
    factory: F,
    config: RuntimeConfig,
    driver: AvatarDriver,
    profile: BodyProfile,
    pipeline: CalibrationPipeline<Ctx>,
    avatar: Option<(AvatarKind, F::Avatar)>,
    ik: Option<IkEngine>,
    scene: Option<Box<dyn SdfScene>>,
    listeners: Vec<FinishedListener>,
    finished: bool,
}

impl<Ctx, Dev, Inp, F> AvatarRuntime<Ctx, Dev, Inp, F>
where
    Ctx: MarionetteContext,
    Dev: DeviceSource,
    Inp: ConfirmSource,
    F: AvatarFactory,
{
    pub fn new(
        context: Arc<Ctx>,
        devices: Dev,
        confirm: Inp,
        floor: Box<dyn FloorProbe>,
        factory: F,
        driver: AvatarDriver,
        config: RuntimeConfig,
    ) -> Self {
        info!("Avatar runtime started with {:?} driver, style {}", driver.kind(), config.controller_style);
        Self {
            pipeline: CalibrationPipeline::new(context.clone(), config.calibration.clone()),
            context,
            devices,
            confirm,
            floor,
            factory,
            config,
            driver,
            profile: BodyProfile::new(),
            avatar: None,
            ik: None,
            scene: None,
            listeners: Vec::new(),
            finished: false,
        }
    }

    /// Runs one frame: devices, sampler, calibration, spawns, IK.
    pub fn tick(&mut self) -> Result<TickReport, EnvError> {
        let frame = self.devices.snapshot()?;
        self.driver.refresh(frame);
        self.pipeline.resolve_samples(&self.driver);

        let confirm = self.confirm.take_confirm();
        let events = self.pipeline.tick(CalibrationTick {
            driver: &mut self.driver,
            profile: &mut self.profile,
            avatar: self.avatar.as_mut().map(|(_, a)| a as &mut dyn HumanoidSkeleton),
            floor: self.floor.as_ref(),
            confirm,
        });
        for event in &events {
            self.handle(event);
        }

        let ik = self.run_ik();
        Ok(TickReport {
            frame: self.context.frame(),
            stage: self.pipeline.stage(),
            events,
            ik,
        })
    }

    fn handle(&mut self, event: &CalibrationEvent) {
        match event {
            CalibrationEvent::Prompt(prompt) => debug!("{}", prompt),
            CalibrationEvent::SpawnMannequin => {
                let mannequin = self.factory.spawn_mannequin(self.profile.measures());
                self.avatar = Some((AvatarKind::Mannequin, mannequin));
                self.ik = None;
            }
            CalibrationEvent::SpawnLiveAvatar => {
                let mut live = self.factory.spawn_live(self.profile.measures());
                if let Some((_, old)) = &self.avatar {
                    live.set_avatar_position(old.avatar_position());
                }
                self.avatar = Some((AvatarKind::Live, live));
                self.ik = None;
            }
            CalibrationEvent::Finished(measures) => {
                self.finished = true;
                for listener in self.listeners.drain(..) {
                    listener(measures);
                }
            }
            CalibrationEvent::StageChanged { .. } | CalibrationEvent::GroundSnapped { .. } => {}
        }
    }

    fn run_ik(&mut self) -> Option<IkFrameOutcome> {
        let done = self.pipeline.is_done();
        if !done && !self.config.ik_during_calibration {
            return None;
        }
        let (_, avatar) = self.avatar.as_mut()?;
        let engine = self.ik.get_or_insert_with(|| {
            IkEngine::new(&*avatar, self.config.properties.clone(), self.config.fingers.clone())
        });
        let policy = self.config.controller_style.policy(
            done,
            self.config.objects_fingers,
            self.config.fingers.uniform_blend,
        );
        let frame = IkFrame {
            profile: &self.profile,
            source: &self.driver,
            policy,
            controller_shape: &self.config.controller_shape,
            scene: self.scene.as_deref(),
        };
        Some(engine.update(avatar, &frame))
    }

    /// Registers a one-shot listener. Fires at once if calibration already finished.
    pub fn on_calibration_finished(&mut self, listener: impl FnOnce(&BodyMeasures) + 'static) {
        if self.finished {
            listener(self.profile.measures());
        } else {
            self.listeners.push(Box::new(listener));
        }
    }

    pub fn is_calibration_finished(&self) -> bool {
        self.finished
    }

    /// Throws the profile away and calibrates again from device detection.
    pub fn recalibrate(&mut self) {
        self.profile.reset();
        self.pipeline.restart();
        self.avatar = None;
        self.ik = None;
        self.finished = false;
    }

    pub fn set_controller_style(&mut self, style: ControllerStyle) {
        info!("Controller style -> {}", style);
        self.config.controller_style = style;
    }

    /// Scene searched for grabbable shapes in object-finger mode.
    pub fn set_scene(&mut self, scene: Box<dyn SdfScene>) {
        self.scene = Some(scene);
    }

    /// Packet for peers, available once calibration has finished.
    pub fn calibration_packet(&self, avatar_name: &str) -> Option<CalibrationPacket> {
        self.finished.then(|| {
            CalibrationPacket::new(self.profile.measures().clone(), self.config.controller_style, avatar_name)
        })
    }

    pub fn stage(&self) -> CalibrationStage {
        self.pipeline.stage()
    }

    pub fn profile(&self) -> &BodyProfile {
        &self.profile
    }

    pub fn driver(&self) -> &AvatarDriver {
        &self.driver
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn avatar(&self) -> Option<&F::Avatar> {
        self.avatar.as_ref().map(|(_, a)| a)
    }

    pub fn avatar_kind(&self) -> Option<AvatarKind> {
        self.avatar.as_ref().map(|(k, _)| *k)
    }

    pub fn ik(&self) -> Option<&IkEngine> {
        self.ik.as_ref()
    }
}
