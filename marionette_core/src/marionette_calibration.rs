//! Calibration Pipeline - staged measurement of the user's body.
//!
//! ```text
//!  DEVICES ──confirm, identified──▶ T_POSE ──samples done──▶ ROOT_AVATAR ──confirm, samples done──▶ DONE
//!     ▲  │                           │  ▲                        │  ▲
//!     └──┘ failure: prompt, retry    └──┘                        └──┘
//! ```
//!
//! The pipeline is polled once per tick. Multi-frame waits (one-tick pose
//! samples, the confirm debounce, the ground-snap settle frames) are held as
//! explicit state and resumed when their precondition holds. Confirm presses
//! are dropped while a measurement or ground snap is in flight.

use crate::body_profile::{
    foot_to_ankle, AnchorJoint, AnchorKind, BodyMeasures, BodyProfile, ProfileError, RootCommit,
    RootSteps, TPoseCommit,
};
use crate::config::CalibrationConfig;
use crate::driver::{AvatarDriver, DetectionCounts, PoseSource};
use crate::identification::IdentifyError;
use crate::messages::{self, Prompt, PromptKind, MISSING_DATA_CODE};
use crate::sampler::{PoseSampler, SamplerError};
use crate::skeleton::{HumanBone, HumanoidSkeleton, Side};
use marionette_env::{DeviceRole, FloorProbe, MarionetteContext, TrackedPose};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// STAGES, ERRORS, EVENTS
// ============================================================================

/// Calibration stage. Ordered by progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CalibrationStage {
    /// Message-lookup sentinel, never the live stage
    Dirty,
    Devices,
    TPose,
    RootAvatar,
    Done,
}

impl CalibrationStage {
    /// Numeric stage code.
    pub fn code(&self) -> i8 {
        match self {
            CalibrationStage::Dirty => -1,
            CalibrationStage::Devices => 0,
            CalibrationStage::TPose => 1,
            CalibrationStage::RootAvatar => 10,
            CalibrationStage::Done => 11,
        }
    }
}

/// A failed stage attempt. Always retryable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error(transparent)]
    Identify(#[from] IdentifyError),

    #[error("Avatar has no {0:?} bone")]
    MissingBone(HumanBone),

    #[error("Device for {0} is not tracked")]
    MissingDevice(DeviceRole),

    #[error("Anchor {0} has not been created")]
    MissingAnchor(AnchorKind),

    #[error(transparent)]
    Sampler(#[from] SamplerError),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

impl CalibrationError {
    /// Failure code used for prompt lookup.
    pub fn code(&self) -> u8 {
        match self {
            CalibrationError::Identify(e) => e.code(),
            _ => MISSING_DATA_CODE,
        }
    }
}

/// Notifications produced by one tick, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    Prompt(Prompt),
    StageChanged {
        from: CalibrationStage,
        to: CalibrationStage,
    },
    /// Show the T-pose mannequin the user steps into
    SpawnMannequin,
    /// Swap the mannequin for the IK-driven avatar
    SpawnLiveAvatar,
    /// Avatar moved vertically by `offset` onto the floor
    GroundSnapped { offset: f64 },
    /// One-shot completion notice
    Finished(BodyMeasures),
}

/// Collaborators the pipeline reads or writes during one tick.
pub struct CalibrationTick<'a> {
    pub driver: &'a mut AvatarDriver,
    pub profile: &'a mut BodyProfile,
    /// The spawned mannequin, once it exists
    pub avatar: Option<&'a mut dyn HumanoidSkeleton>,
    pub floor: &'a dyn FloorProbe,
    /// Confirm edge for this tick
    pub confirm: bool,
}

// ============================================================================
// IN-FLIGHT WORK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Measurement {
    TPose,
    Root,
}

/// Sequential sampling plan. One sample in flight at a time.
#[derive(Debug, Clone)]
struct SampleRun {
    measurement: Measurement,
    plan: Vec<DeviceRole>,
    next: usize,
    awaiting: Option<DeviceRole>,
    samples: Vec<(DeviceRole, Vector3<f64>)>,
}

impl SampleRun {
    fn new(measurement: Measurement, plan: Vec<DeviceRole>) -> Self {
        Self {
            measurement,
            plan,
            next: 0,
            awaiting: None,
            samples: Vec::new(),
        }
    }
}

/// Pending floor snap of a freshly spawned avatar.
#[derive(Debug, Clone, Copy)]
struct GroundSnap {
    due_frame: u64,
    /// Marker offset in the left toes frame, fixed on first sight of the avatar
    marker: Option<Option<Vector3<f64>>>,
}

fn sample_of(samples: &[(DeviceRole, Vector3<f64>)], role: DeviceRole) -> Option<Vector3<f64>> {
    samples.iter().find(|(r, _)| *r == role).map(|(_, p)| *p)
}

/// Pose with the sampled position and the device's live rotation.
fn sampled_pose<S: PoseSource + ?Sized>(
    source: &S,
    samples: &[(DeviceRole, Vector3<f64>)],
    role: DeviceRole,
) -> Result<TrackedPose, CalibrationError> {
    let position = sample_of(samples, role).ok_or(CalibrationError::MissingDevice(role))?;
    let live = source.pose(role).ok_or(CalibrationError::MissingDevice(role))?;
    Ok(TrackedPose::new(position, live.rotation))
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Resumable calibration state machine.
pub struct CalibrationPipeline<C: MarionetteContext> {
    ctx: Arc<C>,
    config: CalibrationConfig,
    stage: CalibrationStage,
    sampler: PoseSampler,
    run: Option<SampleRun>,
    snap: Option<GroundSnap>,
    debounce_until: Duration,
    last_counts: Option<DetectionCounts>,
    introduced: bool,
}

impl<C: MarionetteContext> CalibrationPipeline<C> {
    pub fn new(ctx: Arc<C>, config: CalibrationConfig) -> Self {
        Self {
            ctx,
            config,
            stage: CalibrationStage::Devices,
            sampler: PoseSampler::new(),
            run: None,
            snap: None,
            debounce_until: Duration::ZERO,
            last_counts: None,
            introduced: false,
        }
    }

    pub fn stage(&self) -> CalibrationStage {
        self.stage
    }

    pub fn is_done(&self) -> bool {
        self.stage == CalibrationStage::Done
    }

    /// True while a measurement or ground snap holds input.
    pub fn is_busy(&self) -> bool {
        self.run.is_some() || self.snap.is_some()
    }

    pub fn sampler(&self) -> &PoseSampler {
        &self.sampler
    }

    /// Completes the in-flight sample, if its tick has come.
    pub fn resolve_samples<S: PoseSource + ?Sized>(&mut self, source: &S) {
        self.sampler.resolve(self.ctx.frame(), source);
    }

    /// Starts over from device detection. The caller resets the profile.
    pub fn restart(&mut self) {
        info!("Calibration restarted");
        *self = Self::new(self.ctx.clone(), self.config.clone());
    }

    /// Advances the pipeline by one tick.
    pub fn tick(&mut self, io: CalibrationTick<'_>) -> Vec<CalibrationEvent> {
        let mut events = Vec::new();
        if self.stage == CalibrationStage::Done {
            return events;
        }
        if !self.introduced {
            self.introduced = true;
            self.prompt(&mut events, self.stage, PromptKind::Intro, messages::intro(self.stage));
        }

        let confirmed = io.confirm && self.accept_confirm();

        if self.snap.is_some() {
            self.tick_ground_snap(io.avatar, io.floor, &mut events);
            return events;
        }
        if self.run.is_some() {
            self.tick_run(io, &mut events);
            return events;
        }

        match self.stage {
            CalibrationStage::Dirty | CalibrationStage::Done => {}
            CalibrationStage::Devices => self.tick_devices(io, confirmed, &mut events),
            CalibrationStage::TPose => {
                if io.driver.is_simulated() {
                    if self.ctx.now() >= self.debounce_until {
                        self.instant_tpose(io, &mut events);
                    }
                } else if confirmed {
                    self.start_tpose(io.driver, &mut events);
                }
            }
            CalibrationStage::RootAvatar => {
                let auto = io.driver.is_simulated() && self.ctx.now() >= self.debounce_until;
                if confirmed || auto {
                    self.start_root(io, &mut events);
                }
            }
        }
        events
    }

    /// Consumes a confirm edge unless input is blocked.
    fn accept_confirm(&mut self) -> bool {
        let now = self.ctx.now();
        if self.is_busy() || now < self.debounce_until {
            debug!("Confirm ignored (busy or debounced)");
            return false;
        }
        self.debounce_until = now + self.config.debounce();
        true
    }

    fn debounce(&mut self) {
        self.debounce_until = self.ctx.now() + self.config.debounce();
    }

    fn prompt(
        &self,
        events: &mut Vec<CalibrationEvent>,
        stage: CalibrationStage,
        kind: PromptKind,
        text: Option<String>,
    ) {
        if let Some(text) = text {
            events.push(CalibrationEvent::Prompt(Prompt::new(stage, kind, text)));
        }
    }

    fn fail(&mut self, events: &mut Vec<CalibrationEvent>, error: &CalibrationError) {
        warn!("Calibration stage {:?} failed: {}", self.stage, error);
        self.prompt(events, self.stage, PromptKind::Failure, messages::failure(self.stage, error.code()));
        self.debounce();
    }

    fn enter(&mut self, to: CalibrationStage, events: &mut Vec<CalibrationEvent>) {
        let from = self.stage;
        if to <= from {
            return;
        }
        info!("Calibration stage {:?} -> {:?}", from, to);
        self.stage = to;
        events.push(CalibrationEvent::StageChanged { from, to });
    }

    // ------------------------------------------------------------------------
    // DEVICES
    // ------------------------------------------------------------------------

    fn tick_devices(&mut self, io: CalibrationTick<'_>, confirmed: bool, events: &mut Vec<CalibrationEvent>) {
        if io.driver.is_simulated() {
            self.prompt(events, CalibrationStage::Devices, PromptKind::Success, messages::success(CalibrationStage::Devices));
            self.enter(CalibrationStage::TPose, events);
            self.instant_tpose(io, events);
            return;
        }

        let counts = io.driver.detect();
        let enough = io.driver.has_enough_devices();
        if self.last_counts != Some(counts) {
            debug!("Detected {} controller(s), {} tracker(s)", counts.controllers, counts.trackers);
            self.last_counts = Some(counts);
            self.prompt(
                events,
                CalibrationStage::Dirty,
                PromptKind::Progress,
                messages::progress(CalibrationStage::Dirty, &[&counts.controllers, &counts.trackers]),
            );
            if !enough {
                self.prompt(events, CalibrationStage::Dirty, PromptKind::Failure, messages::failure(CalibrationStage::Dirty, 0));
            }
        }
        if !enough || !confirmed {
            return;
        }

        match io.driver.identify() {
            Ok(()) => {
                self.prompt(events, CalibrationStage::Devices, PromptKind::Success, messages::success(CalibrationStage::Devices));
                self.enter(CalibrationStage::TPose, events);
                self.start_tpose(io.driver, events);
            }
            Err(e) => self.fail(events, &e.into()),
        }
    }

    // ------------------------------------------------------------------------
    // T-POSE
    // ------------------------------------------------------------------------

    fn start_tpose(&mut self, driver: &AvatarDriver, events: &mut Vec<CalibrationEvent>) {
        let mut plan = Vec::with_capacity(4);
        if driver.pose(DeviceRole::Head).is_some() {
            plan.push(DeviceRole::Head);
        }
        plan.extend([DeviceRole::Pelvis, DeviceRole::FootLeft, DeviceRole::FootRight]);
        self.prompt(events, CalibrationStage::TPose, PromptKind::Progress, messages::progress(CalibrationStage::TPose, &[]));
        self.run = Some(SampleRun::new(Measurement::TPose, plan));
    }

    /// Reduced path for simulated drivers: live feet and pelvis, no head.
    fn instant_tpose(&mut self, io: CalibrationTick<'_>, events: &mut Vec<CalibrationEvent>) {
        let samples: Vec<_> = [DeviceRole::Pelvis, DeviceRole::FootLeft, DeviceRole::FootRight]
            .into_iter()
            .filter_map(|role| io.driver.pose(role).map(|p| (role, p.position)))
            .collect();
        io.profile.set_started(true);
        match Self::commit_tpose(io.driver, io.profile, &samples) {
            Ok(()) => self.tpose_succeeded(events),
            Err(e) => self.fail(events, &e),
        }
    }

    fn commit_tpose(
        driver: &AvatarDriver,
        profile: &mut BodyProfile,
        samples: &[(DeviceRole, Vector3<f64>)],
    ) -> Result<(), CalibrationError> {
        let pelvis = sample_of(samples, DeviceRole::Pelvis).ok_or(CalibrationError::MissingDevice(DeviceRole::Pelvis))?;
        let foot_left = sampled_pose(driver, samples, DeviceRole::FootLeft)?;
        let foot_right = sampled_pose(driver, samples, DeviceRole::FootRight)?;

        let left = foot_to_ankle(&foot_left.position, &pelvis);
        let right = foot_to_ankle(&foot_right.position, &pelvis);
        let commit = TPoseCommit {
            eyes_height: sample_of(samples, DeviceRole::Head).map(|head| head.y),
            foot_to_ankle_left: left,
            foot_to_ankle_right: right,
            ankle_left: AnchorJoint::from_world_offset(AnchorKind::AnkleLeft, &foot_left, &Vector3::new(0.0, 0.0, -left)),
            ankle_right: AnchorJoint::from_world_offset(AnchorKind::AnkleRight, &foot_right, &Vector3::new(0.0, 0.0, -right)),
        };
        profile.commit_tpose(commit)?;
        debug!(
            "T-pose measures: eyes {:?}, foot-to-ankle {:.4}/{:.4}",
            commit.eyes_height, left, right
        );
        Ok(())
    }

    fn tpose_succeeded(&mut self, events: &mut Vec<CalibrationEvent>) {
        self.prompt(events, CalibrationStage::TPose, PromptKind::Success, messages::success(CalibrationStage::TPose));
        self.enter(CalibrationStage::RootAvatar, events);
        events.push(CalibrationEvent::SpawnMannequin);
        self.prompt(events, CalibrationStage::RootAvatar, PromptKind::Intro, messages::intro(CalibrationStage::RootAvatar));
        self.snap = Some(GroundSnap {
            due_frame: self.ctx.frame() + self.config.ground_settle_frames,
            marker: None,
        });
        self.debounce();
    }

    // ------------------------------------------------------------------------
    // ROOT
    // ------------------------------------------------------------------------

    fn start_root(&mut self, io: CalibrationTick<'_>, events: &mut Vec<CalibrationEvent>) {
        if io.avatar.is_none() {
            self.fail(events, &CalibrationError::MissingBone(HumanBone::Hips));
            return;
        }
        self.prompt(
            events,
            CalibrationStage::RootAvatar,
            PromptKind::Progress,
            messages::progress(CalibrationStage::RootAvatar, &[]),
        );
        self.run = Some(SampleRun::new(
            Measurement::Root,
            vec![DeviceRole::Pelvis, DeviceRole::FootLeft, DeviceRole::FootRight],
        ));
    }

    fn commit_root(
        &self,
        driver: &AvatarDriver,
        profile: &mut BodyProfile,
        avatar: Option<&dyn HumanoidSkeleton>,
        samples: &[(DeviceRole, Vector3<f64>)],
    ) -> Result<(), CalibrationError> {
        let avatar = avatar.ok_or(CalibrationError::MissingBone(HumanBone::Hips))?;
        let bone = |b: HumanBone| avatar.world_position(b).ok_or(CalibrationError::MissingBone(b));
        let pelvis = sampled_pose(driver, samples, DeviceRole::Pelvis)?;
        let root = AnchorJoint::from_world_offset(AnchorKind::Root, &pelvis, &(bone(HumanBone::Hips)? - pelvis.position));

        // Ankles are re-anchored onto the mannequin's feet, keeping their rotation
        let ankle = |kind: AnchorKind, side: Side, role: DeviceRole| -> Result<AnchorJoint, CalibrationError> {
            let foot = sampled_pose(driver, samples, role)?;
            let existing = profile.anchors().get(kind).ok_or(CalibrationError::MissingAnchor(kind))?;
            let offset = bone(HumanBone::Foot(side))? - foot.position;
            Ok(AnchorJoint::new(
                kind,
                TrackedPose::new(foot.inverse_transform_vector(&offset), existing.local.rotation),
            ))
        };
        let ankle_left = ankle(AnchorKind::AnkleLeft, Side::Left, DeviceRole::FootLeft)?;
        let ankle_right = ankle(AnchorKind::AnkleRight, Side::Right, DeviceRole::FootRight)?;

        let mut root_steps = RootSteps::capture(driver).ok_or_else(|| {
            let role = DeviceRole::ALL
                .into_iter()
                .find(|r| driver.pose(*r).is_none())
                .unwrap_or(DeviceRole::Head);
            CalibrationError::MissingDevice(role)
        })?;
        root_steps.pelvis = pelvis;
        root_steps.foot_left = sampled_pose(driver, samples, DeviceRole::FootLeft)?;
        root_steps.foot_right = sampled_pose(driver, samples, DeviceRole::FootRight)?;

        let back = Vector3::new(0.0, 0.0, -self.config.wrist_back_offset);
        profile.commit_root(RootCommit {
            root,
            ankle_left,
            ankle_right,
            wrist_left: AnchorJoint::fixed(AnchorKind::WristLeft, back),
            wrist_right: AnchorJoint::fixed(AnchorKind::WristRight, back),
            neck: AnchorJoint::fixed(AnchorKind::Neck, Vector3::zeros()),
            root_steps,
        })?;
        debug!("Root anchor offset {:?}", root.local.position);
        Ok(())
    }

    fn finish(&mut self, profile: &mut BodyProfile, events: &mut Vec<CalibrationEvent>) {
        profile.set_completed(true);
        self.enter(CalibrationStage::Done, events);
        self.prompt(events, CalibrationStage::Done, PromptKind::Intro, messages::intro(CalibrationStage::Done));
        events.push(CalibrationEvent::SpawnLiveAvatar);
        events.push(CalibrationEvent::Finished(profile.measures().clone()));
        info!("Calibration finished (eyes height {:.3} m)", profile.measures().eyes_height);
    }

    // ------------------------------------------------------------------------
    // MULTI-FRAME WAITS
    // ------------------------------------------------------------------------

    fn tick_run(&mut self, io: CalibrationTick<'_>, events: &mut Vec<CalibrationEvent>) {
        if self.sampler.is_capturing() {
            return;
        }
        let Some(mut run) = self.run.take() else {
            return;
        };

        if let Some(role) = run.awaiting.take() {
            match self.sampler.read() {
                Ok(position) => run.samples.push((role, position)),
                Err(e) => {
                    self.fail(events, &e.into());
                    return;
                }
            }
        }

        if let Some(role) = run.plan.get(run.next).copied() {
            if let Err(e) = self.sampler.capture(role, self.ctx.frame()) {
                self.fail(events, &e.into());
                return;
            }
            run.next += 1;
            run.awaiting = Some(role);
            self.run = Some(run);
            return;
        }

        match run.measurement {
            Measurement::TPose => {
                io.profile.set_started(true);
                match Self::commit_tpose(io.driver, io.profile, &run.samples) {
                    Ok(()) => self.tpose_succeeded(events),
                    Err(e) => self.fail(events, &e),
                }
            }
            Measurement::Root => {
                let avatar = io.avatar.as_deref();
                match self.commit_root(io.driver, io.profile, avatar, &run.samples) {
                    Ok(()) => self.finish(io.profile, events),
                    Err(e) => self.fail(events, &e),
                }
            }
        }
    }

    fn tick_ground_snap(
        &mut self,
        avatar: Option<&mut dyn HumanoidSkeleton>,
        floor: &dyn FloorProbe,
        events: &mut Vec<CalibrationEvent>,
    ) {
        let Some(mut snap) = self.snap else {
            return;
        };
        let Some(avatar) = avatar else {
            return;
        };
        let toes = HumanBone::Toes(Side::Left);
        let origin = avatar.avatar_position();
        let marker = *snap
            .marker
            .get_or_insert_with(|| avatar.world_pose(toes).map(|p| p.inverse_transform_point(&origin)));
        if self.ctx.frame() < snap.due_frame {
            self.snap = Some(snap);
            return;
        }
        self.snap = None;

        let marker = marker
            .and_then(|local| avatar.world_pose(toes).map(|p| p.transform_point(&local)))
            .unwrap_or(origin);
        let length = self.config.ground_ray_length;
        let hit = floor
            .raycast(&marker, &-Vector3::y(), length)
            .or_else(|| floor.raycast(&marker, &Vector3::y(), length));
        match hit {
            Some(hit) => {
                let offset = hit.y - marker.y;
                avatar.set_avatar_position(origin + Vector3::new(0.0, offset, 0.0));
                debug!("Avatar snapped to floor ({:+.4} m)", offset);
                events.push(CalibrationEvent::GroundSnapped { offset });
            }
            None => debug!("No floor within {} m of the avatar", length),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{HardwareDriver, RoleMap, SimulatedDriver};
    use crate::identification::IdentificationConfig;
    use crate::rig::{RigSkeleton, RigTemplate};
    use crate::testing::{t_pose_frame, StepClock};
    use approx::assert_relative_eq;
    use marionette_env::{DeviceClass, DeviceFrame, DeviceId, FlatFloor};
    use proptest::prelude::*;

    struct Harness {
        clock: Arc<StepClock>,
        pipeline: CalibrationPipeline<StepClock>,
        driver: AvatarDriver,
        profile: BodyProfile,
        avatar: Option<RigSkeleton>,
        floor: FlatFloor,
        frame: fn(u64) -> DeviceFrame,
        log: Vec<CalibrationEvent>,
    }

    impl Harness {
        fn new(driver: AvatarDriver) -> Self {
            let clock = Arc::new(StepClock::default());
            Self {
                pipeline: CalibrationPipeline::new(clock.clone(), CalibrationConfig::default()),
                clock,
                driver,
                profile: BodyProfile::new(),
                avatar: None,
                floor: FlatFloor::default(),
                frame: t_pose_frame,
                log: Vec::new(),
            }
        }

        fn hardware() -> Self {
            Self::new(HardwareDriver::new(IdentificationConfig::default()).into())
        }

        fn step(&mut self, confirm: bool) -> Vec<CalibrationEvent> {
            self.clock.step(0.1);
            self.driver.refresh((self.frame)(self.clock.frame()));
            self.pipeline.resolve_samples(&self.driver);
            let events = self.pipeline.tick(CalibrationTick {
                driver: &mut self.driver,
                profile: &mut self.profile,
                avatar: self.avatar.as_mut().map(|a| a as &mut dyn HumanoidSkeleton),
                floor: &self.floor,
                confirm,
            });
            if events.contains(&CalibrationEvent::SpawnMannequin) {
                self.avatar = Some(RigTemplate::humanoid().build(self.profile.measures().eyes_height));
            }
            self.log.extend(events.iter().cloned());
            events
        }

        fn run_until(&mut self, stage: CalibrationStage, max: usize) {
            for _ in 0..max {
                if self.pipeline.stage() >= stage && !self.pipeline.is_busy() {
                    return;
                }
                self.step(false);
            }
        }

        fn texts(&self) -> Vec<String> {
            self.log
                .iter()
                .filter_map(|e| match e {
                    CalibrationEvent::Prompt(p) => Some(p.text.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    fn full_map() -> RoleMap {
        RoleMap::new()
            .with(DeviceRole::Head, DeviceId(0))
            .with(DeviceRole::HandRight, DeviceId(3))
            .with(DeviceRole::HandLeft, DeviceId(4))
            .with(DeviceRole::FootRight, DeviceId(5))
            .with(DeviceRole::Pelvis, DeviceId(6))
            .with(DeviceRole::FootLeft, DeviceId(8))
    }

    #[test]
    fn test_stage_codes_are_ordered() {
        let stages = [
            CalibrationStage::Dirty,
            CalibrationStage::Devices,
            CalibrationStage::TPose,
            CalibrationStage::RootAvatar,
            CalibrationStage::Done,
        ];
        assert!(stages.windows(2).all(|w| w[0] < w[1] && w[0].code() < w[1].code()));
        assert_eq!(CalibrationStage::RootAvatar.code(), 10);
    }

    #[test]
    fn test_detection_prompts() {
        let mut h = Harness::hardware();
        h.frame = |f| {
            let mut frame = t_pose_frame(f);
            frame.devices.truncate(4);
            frame
        };
        h.step(true);
        h.step(false);
        let texts = h.texts();
        assert!(texts.iter().any(|t| t == "Found 2 controller(s) and 1 tracker(s)."));
        assert!(texts.iter().any(|t| t == "Please, connect more controllers and/or trackers."));
        // Unchanged counts do not repeat the prompt
        assert_eq!(texts.iter().filter(|t| t.starts_with("Found")).count(), 1);
        assert_eq!(h.pipeline.stage(), CalibrationStage::Devices);
    }

    #[test]
    fn test_hardware_calibration_two_confirms() {
        let mut h = Harness::hardware();
        h.step(false);
        assert_eq!(h.pipeline.stage(), CalibrationStage::Devices);

        h.step(true);
        assert_eq!(h.pipeline.stage(), CalibrationStage::TPose);
        assert!(h.pipeline.is_busy());

        h.run_until(CalibrationStage::RootAvatar, 20);
        assert_eq!(h.pipeline.stage(), CalibrationStage::RootAvatar);
        assert_relative_eq!(h.profile.measures().eyes_height, 1.7, epsilon = 1e-12);
        assert!(h.avatar.is_some());

        // Debounced right after the stage change
        h.step(true);
        assert!(h.pipeline.stage() < CalibrationStage::Done && !h.pipeline.is_busy());
        for _ in 0..10 {
            h.step(false);
        }
        h.step(true);
        h.run_until(CalibrationStage::Done, 20);

        assert!(h.pipeline.is_done());
        assert!(h.profile.is_completed());
        assert!(h.profile.measures().is_complete());
        assert!(h.profile.anchors().is_complete());
        let finished = h.log.iter().filter(|e| matches!(e, CalibrationEvent::Finished(_))).count();
        assert_eq!(finished, 1);
        assert!(h.log.contains(&CalibrationEvent::SpawnLiveAvatar));

        let stages: Vec<_> = h
            .log
            .iter()
            .filter_map(|e| match e {
                CalibrationEvent::StageChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![CalibrationStage::TPose, CalibrationStage::RootAvatar, CalibrationStage::Done]
        );
        assert!(h.step(true).is_empty());
        assert!(h.pipeline.is_done());
    }

    #[test]
    fn test_root_anchor_lands_on_mannequin_hips() {
        let mut h = Harness::hardware();
        h.step(true);
        h.run_until(CalibrationStage::RootAvatar, 20);
        for _ in 0..10 {
            h.step(false);
        }
        h.step(true);
        h.run_until(CalibrationStage::Done, 20);

        let avatar = h.avatar.as_ref().unwrap();
        let root = h.profile.anchors().world_pose(AnchorKind::Root, &h.driver).unwrap();
        assert_relative_eq!(root.position, avatar.world_position(HumanBone::Hips).unwrap(), epsilon = 1e-9);
        let ankle = h.profile.anchors().world_pose(AnchorKind::AnkleRight, &h.driver).unwrap();
        assert_relative_eq!(
            ankle.position,
            avatar.world_position(HumanBone::Foot(Side::Right)).unwrap(),
            epsilon = 1e-9
        );
        let wrist = h.profile.anchors().world_pose(AnchorKind::WristLeft, &h.driver).unwrap();
        assert_relative_eq!(wrist.position, Vector3::new(-0.6, 1.4, -0.1), epsilon = 1e-12);
    }

    #[test]
    fn test_wrist_anchor_trails_controller_forward() {
        let mut h = Harness::hardware();
        h.step(true);
        h.run_until(CalibrationStage::RootAvatar, 20);
        for _ in 0..10 {
            h.step(false);
        }
        h.step(true);
        h.run_until(CalibrationStage::Done, 20);
        assert!(h.pipeline.is_done());

        // Controllers pitched and yawed after calibration
        h.frame = |f| {
            let mut frame = t_pose_frame(f);
            let turn = nalgebra::UnitQuaternion::from_euler_angles(0.4, -0.7, 0.2);
            for device in frame.devices.iter_mut().filter(|d| d.class == DeviceClass::Controller) {
                device.pose.rotation = turn;
            }
            frame
        };
        h.step(false);

        for (kind, role) in [
            (AnchorKind::WristLeft, DeviceRole::HandLeft),
            (AnchorKind::WristRight, DeviceRole::HandRight),
        ] {
            let hand = h.driver.pose(role).unwrap();
            let wrist = h.profile.anchors().world_pose(kind, &h.driver).unwrap();
            let expected = hand.position - hand.rotation * Vector3::z() * 0.1;
            assert_relative_eq!(wrist.position, expected, epsilon = 1e-12);
            assert_relative_eq!((wrist.position - hand.position).norm(), 0.1, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_identification_failure_is_retryable() {
        let mut h = Harness::hardware();
        // Headset facing sideways: body plane normal is perpendicular to gaze
        h.frame = |f| {
            let mut frame = t_pose_frame(f);
            frame.devices[0].pose.rotation =
                nalgebra::UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f64::consts::FRAC_PI_2);
            frame
        };
        h.step(true);
        assert_eq!(h.pipeline.stage(), CalibrationStage::Devices);
        assert!(h.texts().iter().any(|t| t.contains("head is not aligned")));

        h.frame = t_pose_frame;
        for _ in 0..10 {
            h.step(false);
        }
        h.step(true);
        assert_eq!(h.pipeline.stage(), CalibrationStage::TPose);
    }

    #[test]
    fn test_lost_device_fails_tpose_without_commit() {
        let mut h = Harness::hardware();
        h.step(true);
        h.frame = |f| {
            let mut frame = t_pose_frame(f);
            frame.devices.retain(|d| d.id != DeviceId(8));
            frame
        };
        h.run_until(CalibrationStage::RootAvatar, 10);
        assert_eq!(h.pipeline.stage(), CalibrationStage::TPose);
        assert!(!h.pipeline.is_busy());
        assert!(h.texts().iter().any(|t| t.starts_with("Could not find a required bone")));
        assert!(!h.profile.anchors().contains(AnchorKind::AnkleLeft));
        assert_eq!(h.profile.measures(), &BodyMeasures::default());

        h.frame = t_pose_frame;
        for _ in 0..10 {
            h.step(false);
        }
        h.step(true);
        h.run_until(CalibrationStage::RootAvatar, 20);
        assert_eq!(h.pipeline.stage(), CalibrationStage::RootAvatar);
    }

    #[test]
    fn test_simulated_driver_reduced_path() {
        let driver = SimulatedDriver::new(full_map()).unwrap();
        let mut h = Harness::new(driver.into());
        h.step(false);
        assert_eq!(h.pipeline.stage(), CalibrationStage::RootAvatar);
        // No head sample on the reduced path
        assert_relative_eq!(h.profile.measures().eyes_height, BodyMeasures::default().eyes_height);
        assert_relative_eq!(h.profile.measures().foot_to_ankle_left, 0.0);

        h.run_until(CalibrationStage::Done, 40);
        assert!(h.pipeline.is_done());
    }

    #[test]
    fn test_ground_snap_moves_mannequin() {
        let mut h = Harness::hardware();
        h.floor = FlatFloor::new(0.03);
        h.step(true);
        h.run_until(CalibrationStage::RootAvatar, 20);
        let snapped = h.log.iter().find_map(|e| match e {
            CalibrationEvent::GroundSnapped { offset } => Some(*offset),
            _ => None,
        });
        assert_relative_eq!(snapped.unwrap(), 0.03, epsilon = 1e-9);
        assert_relative_eq!(h.avatar.as_ref().unwrap().avatar_position().y, 0.03, epsilon = 1e-9);
    }

    #[test]
    fn test_measures_from_fixed_samples() {
        let mut driver: AvatarDriver = SimulatedDriver::new(full_map()).unwrap().into();
        let mut frame = t_pose_frame(0);
        frame.devices[3].pose.position = Vector3::new(0.1, 0.0, -0.05);
        frame.devices[5].pose.position = Vector3::new(-0.1, 0.0, -0.05);
        driver.refresh(frame);

        let samples = [
            (DeviceRole::Pelvis, Vector3::new(0.0, 1.0, 0.0)),
            (DeviceRole::FootLeft, Vector3::new(-0.1, 0.0, -0.05)),
            (DeviceRole::FootRight, Vector3::new(0.1, 0.0, -0.05)),
        ];
        let mut profile = BodyProfile::new();
        CalibrationPipeline::<StepClock>::commit_tpose(&driver, &mut profile, &samples).unwrap();
        assert_relative_eq!(profile.measures().foot_to_ankle_left, 0.05, epsilon = 1e-12);
        assert_relative_eq!(profile.measures().foot_to_ankle_right, 0.05, epsilon = 1e-12);
        let ankle = profile.anchors().world_pose(AnchorKind::AnkleLeft, &driver).unwrap();
        assert_relative_eq!(ankle.position, Vector3::new(-0.1, 0.0, -0.1), epsilon = 1e-12);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn test_stage_never_goes_back(presses in proptest::collection::vec(any::<bool>(), 1..80)) {
            let mut h = Harness::hardware();
            let mut last = h.pipeline.stage();
            for press in presses {
                h.step(press);
                prop_assert!(h.pipeline.stage() >= last);
                last = h.pipeline.stage();
            }
        }
    }
}
