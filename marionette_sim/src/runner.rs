//! Scenario runner for calibration and IK simulations.
//!
//! Every scenario builds one [`Session`]: a virtual clock, a seeded
//! performer, a device feed, scripted confirms and a full
//! [`AvatarRuntime`]. The loop steps the clock, publishes the oracle's
//! frame and ticks the runtime, then the scenario checks its invariants.

use crate::context::SimContext;
use crate::oracle::BodyOracle;
use crate::scenarios::ScenarioId;
use crate::script::ConfirmScript;
use marionette_core::driver::DriverError;
use marionette_core::marionette_ik::IkFrameOutcome;
use marionette_core::messages::{self, PromptKind};
use marionette_core::replication::{replay_roles, ReplicationError};
use marionette_core::{
    AnchorKind, AvatarDriver, AvatarRuntime, BodyMeasures, CalibrationEvent, CalibrationPacket, CalibrationStage,
    ControllerStyle, FinishedGate, HardwareDriver, HumanBone, HumanoidSkeleton, PoseSource, RigTemplate, RuntimeConfig, Side,
    SimulatedDriver, TickReport, TrackerPacket,
};
use marionette_core::skeleton::Digit;
use marionette_env::{DeviceRole, EnvError, FlatFloor, MarionetteContext, SharedDeviceFeed};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Upper bound on seeded reaction time added to scripted presses
const REACTION_SECS: f64 = 0.25;

/// Ticks run after calibration before IK checks begin
const SETTLE_TICKS: u64 = 10;

type SimRuntime = AvatarRuntime<SimContext, SharedDeviceFeed, ConfirmScript, RigTemplate>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error("{0}")]
    Check(String),
}

fn check(condition: bool, reason: impl FnOnce() -> String) -> Result<(), SimError> {
    if condition {
        Ok(())
    } else {
        Err(SimError::Check(reason()))
    }
}

/// Result of running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub scenario: ScenarioId,
    pub seed: u64,
    pub passed: bool,
    pub total_ticks: u64,
    pub final_time_secs: f64,
    pub failure_reason: Option<String>,
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during a scenario.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub prompts: u64,
    pub failure_prompts: u64,
    /// Virtual time at which calibration reached DONE
    pub calibration_secs: Option<f64>,
    pub eyes_height: Option<f64>,
    pub ik_solved: u64,
    pub ik_skipped: u64,
    /// Largest forearm displacement past its bind length
    pub max_stretch: f64,
    /// Largest frame-over-frame finger score increase
    pub max_score_rise: f64,
}

/// One runtime plus the simulated world around it.
struct Session {
    ctx: Arc<SimContext>,
    oracle: BodyOracle,
    feed: SharedDeviceFeed,
    runtime: SimRuntime,
    dt: Duration,
    ticks: u64,
    max_ticks: u64,
    metrics: ScenarioMetrics,
    /// Failure prompts in arrival order
    failures: Vec<(CalibrationStage, String)>,
    finished: Rc<RefCell<Option<BodyMeasures>>>,
    last_ik: Option<IkFrameOutcome>,
}

impl Session {
    fn tick(&mut self) -> Result<TickReport, SimError> {
        let frame = self.ctx.step(self.dt);
        self.oracle.step(self.dt.as_secs_f64());
        self.feed.publish(self.oracle.frame(frame))?;
        let report = self.runtime.tick()?;
        self.record(&report);
        Ok(report)
    }

    fn record(&mut self, report: &TickReport) {
        self.ticks += 1;
        for event in &report.events {
            match event {
                CalibrationEvent::Prompt(prompt) => {
                    self.metrics.prompts += 1;
                    if prompt.kind == PromptKind::Failure {
                        self.metrics.failure_prompts += 1;
                        self.failures.push((prompt.stage, prompt.text.clone()));
                    }
                }
                CalibrationEvent::StageChanged { to: CalibrationStage::Done, .. } => {
                    self.metrics.calibration_secs = Some(self.ctx.now().as_secs_f64());
                }
                _ => {}
            }
        }
        match report.ik {
            Some(IkFrameOutcome::Solved) => self.metrics.ik_solved += 1,
            Some(IkFrameOutcome::Skipped(_)) => self.metrics.ik_skipped += 1,
            _ => {}
        }
        self.last_ik = report.ik;
    }

    /// Ticks until `done` holds or `max_ticks` pass. Returns whether it held.
    fn run_until(&mut self, max_ticks: u64, mut done: impl FnMut(&Session) -> bool) -> Result<bool, SimError> {
        for _ in 0..max_ticks {
            if done(self) {
                return Ok(true);
            }
            self.tick()?;
            if self.ticks % 30 == 0 {
                debug!(
                    "  t={:.1}s | stage={:?} | prompts={}",
                    self.oracle.time(),
                    self.runtime.stage(),
                    self.metrics.prompts
                );
            }
        }
        Ok(done(self))
    }

    fn remaining(&self) -> u64 {
        self.max_ticks.saturating_sub(self.ticks)
    }

    fn run_for(&mut self, ticks: u64) -> Result<(), SimError> {
        for _ in 0..ticks.min(self.remaining()) {
            self.tick()?;
        }
        Ok(())
    }

    fn saw_failure(&self, stage: CalibrationStage, code: u8) -> bool {
        let Some(text) = messages::failure(stage, code) else {
            return false;
        };
        self.failures.iter().any(|(s, t)| *s == stage && *t == text)
    }

    fn summary(self) -> (ScenarioMetrics, u64, f64) {
        (self.metrics, self.ticks, self.oracle.time())
    }

    fn avatar_bone(&self, bone: HumanBone) -> Result<nalgebra::Vector3<f64>, SimError> {
        self.runtime
            .avatar()
            .and_then(|a| a.world_position(bone))
            .ok_or_else(|| SimError::Check(format!("avatar has no {:?}", bone)))
    }
}

/// Runs scenarios with deterministic seeding.
pub struct ScenarioRunner {
    /// Master seed
    seed: u64,

    /// Base runtime configuration; scenarios override the style they test
    config: RuntimeConfig,

    /// Maximum simulation duration (seconds)
    max_duration_secs: f64,

    /// Ticks per second
    tick_rate_hz: u32,
}

impl ScenarioRunner {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: RuntimeConfig::default(),
            max_duration_secs: 10.0,
            tick_rate_hz: 30,
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }


    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Running {} (seed={}): {}", scenario.name(), self.seed, scenario.description());

        let (session, outcome) = match self.session(scenario) {
            Ok(mut session) => {
                let outcome = match scenario {
                    ScenarioId::TPoseCalibration => self.run_t_pose_calibration(&mut session),
                    ScenarioId::SimulatedDriver => self.run_simulated_driver(&mut session),
                    ScenarioId::MisalignedHead => self.run_misaligned_head(&mut session),
                    ScenarioId::MissingDevices => self.run_missing_devices(&mut session),
                    ScenarioId::ReachStretch => self.run_reach_stretch(&mut session),
                    ScenarioId::GripController => self.run_grip_controller(&mut session),
                };
                (Some(session), outcome)
            }
            Err(e) => (None, Err(e)),
        };

        let failure_reason = outcome.err().map(|e| e.to_string());
        let (metrics, total_ticks, final_time_secs) = session.map(Session::summary).unwrap_or_default();
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            total_ticks,
            final_time_secs,
            failure_reason,
            metrics,
        }
    }

    fn physics_seed(&self) -> u64 {
        self.seed.wrapping_mul(0x9e3779b97f4a7c15)
    }

    /// Builds the world a scenario starts from.
    fn session(&self, scenario: ScenarioId) -> Result<Session, SimError> {
        let ctx = SimContext::shared(self.seed);
        let mut oracle = BodyOracle::new(self.physics_seed());
        let mut config = self.config.clone();

        let presses: &[f64] = match scenario {
            ScenarioId::TPoseCalibration | ScenarioId::ReachStretch | ScenarioId::GripController => &[0.5, 2.5],
            ScenarioId::SimulatedDriver => &[],
            ScenarioId::MisalignedHead => &[0.5, 2.0, 4.0],
            ScenarioId::MissingDevices => &[0.5, 2.5, 4.5],
        };
        match scenario {
            ScenarioId::MisalignedHead => oracle.turn_head(90.0),
            ScenarioId::MissingDevices => {
                oracle.lose(DeviceRole::Pelvis);
                oracle.lose(DeviceRole::FootRight);
            }
            ScenarioId::ReachStretch => config.controller_style = ControllerStyle::CloseHandStretchArm,
            ScenarioId::GripController => config.controller_style = ControllerStyle::ClosedHandAttachedControllers,
            ScenarioId::TPoseCalibration | ScenarioId::SimulatedDriver => {}
        }

        let driver: AvatarDriver = match scenario {
            ScenarioId::SimulatedDriver => SimulatedDriver::new(oracle.roles())?.into(),
            _ => HardwareDriver::new(config.identification.clone()).into(),
        };

        let feed = SharedDeviceFeed::new();
        let script = ConfirmScript::with_reaction(ctx.clone(), presses, REACTION_SECS);
        let mut runtime = AvatarRuntime::new(
            ctx.clone(),
            feed.clone(),
            script,
            Box::new(FlatFloor::default()),
            RigTemplate::humanoid(),
            driver,
            config,
        );

        let finished = Rc::new(RefCell::new(None));
        let sink = finished.clone();
        runtime.on_calibration_finished(move |measures| *sink.borrow_mut() = Some(measures.clone()));

        Ok(Session {
            ctx,
            oracle,
            feed,
            runtime,
            dt: Duration::from_secs_f64(1.0 / self.tick_rate_hz as f64),
            ticks: 0,
            max_ticks: (self.max_duration_secs * self.tick_rate_hz as f64) as u64,
            metrics: ScenarioMetrics::default(),
            failures: Vec::new(),
            finished,
            last_ik: None,
        })
    }

    /// Ticks until calibration finishes and records the measured eye height.
    fn calibrate(&self, s: &mut Session) -> Result<(), SimError> {
        let budget = s.remaining();
        let done = s.run_until(budget, |s| s.runtime.is_calibration_finished())?;
        check(done, || format!("calibration stuck in {:?}", s.runtime.stage()))?;
        s.metrics.eyes_height = Some(s.runtime.profile().measures().eyes_height);
        info!(
            "Calibrated after {:.2}s, eyes at {:.3}m",
            s.ctx.now().as_secs_f64(),
            s.runtime.profile().measures().eyes_height
        );
        Ok(())
    }

    fn expect_solved(&self, s: &mut Session) -> Result<(), SimError> {
        s.run_for(SETTLE_TICKS)?;
        check(s.last_ik == Some(IkFrameOutcome::Solved), || {
            format!("IK did not solve after calibration: {:?}", s.last_ik)
        })
    }

    /// Hardware calibration end to end, then the replication payloads.
    fn run_t_pose_calibration(&self, s: &mut Session) -> Result<(), SimError> {
        self.calibrate(s)?;

        let measures = s.runtime.profile().measures().clone();
        check(measures.is_complete(), || "measures have no root steps".to_string())?;
        check(s.finished.borrow().as_ref() == Some(&measures), || {
            "finished listener did not receive the final measures".to_string()
        })?;
        let truth = s.oracle.performer().eyes_height;
        check((measures.eyes_height - truth).abs() < 0.01, || {
            format!("eye height {:.4}m, performer has {:.4}m", measures.eyes_height, truth)
        })?;

        self.expect_solved(s)?;
        let hips = s.avatar_bone(HumanBone::Hips)?;
        let root = s
            .runtime
            .profile()
            .anchors()
            .world_pose(AnchorKind::Root, s.runtime.driver())
            .ok_or_else(|| SimError::Check("root anchor does not resolve".to_string()))?;
        let error = (hips - root.position).norm();
        check(error < 1e-6, || format!("hips {:.6}m away from the root anchor", error))?;

        self.check_replication(s)
    }

    /// A remote observer replays the calibration and a live update from JSON.
    fn check_replication(&self, s: &Session) -> Result<(), SimError> {
        let packet = s
            .runtime
            .calibration_packet("performer")
            .ok_or_else(|| SimError::Check("no calibration packet after finish".to_string()))?;
        let mut gate = FinishedGate::new();
        gate.offer(packet);
        let packet = gate
            .poll(s.runtime.is_calibration_finished())
            .ok_or_else(|| SimError::Check("replication gate held a finished calibration".to_string()))?;
        let received = CalibrationPacket::decode(&packet.encode()?)?;
        let steps = received.measures.root_steps.ok_or(ReplicationError::NoRootSteps)?;

        let roles = replay_roles();
        let mut observer: AvatarDriver = SimulatedDriver::new(roles.clone())?.into();
        observer.refresh(received.root_step_frame(&roles, 0)?);
        for role in DeviceRole::ALL {
            let replayed = observer.pose(role).map(|p| (p.position - steps.get(role).position).norm());
            check(replayed.map_or(false, |d| d < 1e-9), || format!("replayed {} differs", role))?;
        }

        let update = TrackerPacket::capture(received.avatar_id, s.runtime.driver())
            .ok_or_else(|| SimError::Check("live roles untracked".to_string()))?;
        let update = TrackerPacket::decode(&update.encode()?)?;
        observer.refresh(update.to_frame(&roles, 1)?);
        let local = s.runtime.driver().pose(DeviceRole::Pelvis);
        let remote = observer.pose(DeviceRole::Pelvis);
        let drift = local.zip(remote).map(|(a, b)| (a.position - b.position).norm());
        check(drift.map_or(false, |d| d < 1e-9), || "observer pelvis drifted".to_string())
    }

    /// Known roles: no confirms, reduced T-pose, default eye height.
    fn run_simulated_driver(&self, s: &mut Session) -> Result<(), SimError> {
        self.calibrate(s)?;
        check(s.metrics.failure_prompts == 0, || {
            format!("{} failure prompt(s) on the simulated path", s.metrics.failure_prompts)
        })?;
        let eyes = s.runtime.profile().measures().eyes_height;
        let default_eyes = BodyMeasures::default().eyes_height;
        check((eyes - default_eyes).abs() < 1e-12, || {
            format!("reduced path measured eye height {:.4}m", eyes)
        })?;
        self.expect_solved(s)
    }

    /// Code 2 while the head is turned, success once it faces forward.
    fn run_misaligned_head(&self, s: &mut Session) -> Result<(), SimError> {
        let budget = s.remaining();
        let reported = s.run_until(budget, |s| s.saw_failure(CalibrationStage::Devices, 2))?;
        check(reported, || "head misalignment was never reported".to_string())?;
        check(s.runtime.stage() == CalibrationStage::Devices, || {
            format!("misaligned identification advanced to {:?}", s.runtime.stage())
        })?;

        s.oracle.turn_head(0.0);
        self.calibrate(s)?;
        self.expect_solved(s)
    }

    /// The connect-more prompt holds detection until the trackers return.
    fn run_missing_devices(&self, s: &mut Session) -> Result<(), SimError> {
        let budget = s.remaining();
        let until = Duration::from_secs_f64(1.5);
        s.run_until(budget, |s| s.ctx.now() >= until)?;
        check(s.saw_failure(CalibrationStage::Dirty, 0), || "no connect-more prompt".to_string())?;
        check(s.runtime.stage() == CalibrationStage::Devices, || {
            format!("advanced to {:?} with two trackers off", s.runtime.stage())
        })?;

        s.oracle.restore_all();
        self.calibrate(s)?;
        self.expect_solved(s)
    }

    /// Reach past the arm and watch the forearm slide without shrinking.
    fn run_reach_stretch(&self, s: &mut Session) -> Result<(), SimError> {
        self.calibrate(s)?;
        self.expect_solved(s)?;

        let side = Side::Right;
        let (bind_upper, bind_forearm) = s
            .runtime
            .avatar()
            .and_then(|a| {
                Some((
                    a.bind_distance(HumanBone::UpperArm(side), HumanBone::LowerArm(side))?,
                    a.bind_distance(HumanBone::LowerArm(side), HumanBone::Hand(side))?,
                ))
            })
            .ok_or_else(|| SimError::Check("avatar has no right arm".to_string()))?;

        s.oracle.reach(side, 0.3);
        for _ in 0..(2 * SETTLE_TICKS).min(s.remaining()) {
            s.tick()?;
            let upper = s.avatar_bone(HumanBone::UpperArm(side))?;
            let lower = s.avatar_bone(HumanBone::LowerArm(side))?;
            let hand = s.avatar_bone(HumanBone::Hand(side))?;
            let forearm = (hand - lower).norm();
            check(forearm >= bind_forearm - 1e-6, || {
                format!("forearm shrank to {:.4}m (bind {:.4}m)", forearm, bind_forearm)
            })?;
            s.metrics.max_stretch = s.metrics.max_stretch.max((lower - upper).norm() - bind_upper);
        }
        check(s.metrics.max_stretch > 0.01, || {
            format!("arm never stretched ({:.4}m)", s.metrics.max_stretch)
        })
    }

    /// Finger scores against still controllers only go down.
    fn run_grip_controller(&self, s: &mut Session) -> Result<(), SimError> {
        self.calibrate(s)?;
        s.oracle.set_noise(0.0);
        self.expect_solved(s)?;

        let mut previous: Vec<f64> = grip_scores(s)?;
        for _ in 0..(6 * SETTLE_TICKS).min(s.remaining()) {
            s.tick()?;
            let scores = grip_scores(s)?;
            for (before, after) in previous.iter().zip(&scores) {
                s.metrics.max_score_rise = s.metrics.max_score_rise.max(after - before);
            }
            previous = scores;
        }
        check(s.metrics.max_score_rise <= 1e-9, || {
            format!("finger score rose by {:.3e}", s.metrics.max_score_rise)
        })
    }
}

/// Controller score of every finger chain, right hand first.
fn grip_scores(s: &Session) -> Result<Vec<f64>, SimError> {
    let missing = |what: &str| SimError::Check(format!("no {} to score", what));
    let fingers = s.runtime.ik().and_then(|ik| ik.fingers()).ok_or_else(|| missing("finger solver"))?;
    let avatar = s.runtime.avatar().ok_or_else(|| missing("avatar"))?;
    let shape = &s.runtime.config().controller_shape;

    let mut scores = Vec::with_capacity(2 * Digit::ALL.len());
    for side in Side::BOTH {
        let role = match side {
            Side::Left => DeviceRole::HandLeft,
            Side::Right => DeviceRole::HandRight,
        };
        let controller = s.runtime.driver().pose(role).ok_or_else(|| missing("controller"))?;
        for digit in Digit::ALL {
            let score = fingers
                .controller_score(avatar, side, digit, shape, &controller)
                .ok_or_else(|| missing("finger chain"))?;
            scores.push(score);
        }
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_scenario_passes_on_default_seed() {
        let runner = ScenarioRunner::new(42);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(result.passed, "{}: {:?}", scenario, result.failure_reason);
            assert!(result.total_ticks > 0);
        }
    }

    #[test]
    fn test_same_seed_same_result() {
        let a = ScenarioRunner::new(7).run(ScenarioId::TPoseCalibration);
        let b = ScenarioRunner::new(7).run(ScenarioId::TPoseCalibration);
        assert_eq!(a.total_ticks, b.total_ticks);
        assert_eq!(a.metrics.eyes_height, b.metrics.eyes_height);
        assert_eq!(a.metrics.calibration_secs, b.metrics.calibration_secs);
    }

    #[test]
    fn test_too_short_run_fails_with_reason() {
        let result = ScenarioRunner::new(1).with_duration(0.2).run(ScenarioId::TPoseCalibration);
        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("stuck"));
    }

    #[test]
    fn test_misaligned_head_reports_failure_prompt() {
        let result = ScenarioRunner::new(3).run(ScenarioId::MisalignedHead);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.failure_prompts >= 1);
    }
}
