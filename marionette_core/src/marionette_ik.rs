//! IK Engine - maps anchor joints onto the skeleton every frame.
//!
//! ```text
//!   Inactive ──first update──▶ ReferenceCaptured ──next update──▶ Active
//!                (spine reference, T-pose)            (solve every frame)
//! ```
//!
//! Each active frame:
//! 1. hips rotation from the root anchor (bind rotation factored out)
//! 2. spine from the root-to-head-centre direction, head from the neck anchor
//! 3. limb targets offset by the hips offset; hands extrapolated through the
//!    palm grab point using last frame's hand rotation
//! 4. host IK, then hips moved onto the root anchor
//! 5. attached-hand offset, arm stretch, fingers, controller proxy clamp
//!
//! Missing anchors, devices or bones skip the frame without touching a bone.

use crate::body_profile::{AnchorKind, AnchorPoses, BodyProfile};
use crate::config::{AvatarProperties, FingerSolverConfig};
use crate::controller_style::{FingerPolicy, StylePolicy};
use crate::driver::PoseSource;
use crate::marionette_fingers::FingerSolver;
use crate::math::{euler_degrees_v, from_to_rotation};
use crate::sdf::{ControllerShape, SdfScene};
use crate::skeleton::{HumanBone, HumanoidSkeleton, IkGoal, IkTarget, Side};
use marionette_env::{DeviceRole, TrackedPose};
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Shortfall below which the arm is not stretched.
const STRETCH_EPSILON: f64 = 1e-4;

/// Bones the engine writes or reads every frame.
const REQUIRED_BONES: [HumanBone; 15] = [
    HumanBone::Hips,
    HumanBone::Spine,
    HumanBone::Head,
    HumanBone::UpperArm(Side::Left),
    HumanBone::LowerArm(Side::Left),
    HumanBone::Hand(Side::Left),
    HumanBone::UpperArm(Side::Right),
    HumanBone::LowerArm(Side::Right),
    HumanBone::Hand(Side::Right),
    HumanBone::UpperLeg(Side::Left),
    HumanBone::LowerLeg(Side::Left),
    HumanBone::Foot(Side::Left),
    HumanBone::UpperLeg(Side::Right),
    HumanBone::LowerLeg(Side::Right),
    HumanBone::Foot(Side::Right),
];

fn side_index(side: Side) -> usize {
    match side {
        Side::Right => 0,
        Side::Left => 1,
    }
}

fn hand_role(side: Side) -> DeviceRole {
    match side {
        Side::Left => DeviceRole::HandLeft,
        Side::Right => DeviceRole::HandRight,
    }
}

// ============================================================================
// TYPES
// ============================================================================

/// Activation state of one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IkPhase {
    Inactive,
    ReferenceCaptured,
    Active,
}

/// Why a frame was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingAnchor(AnchorKind),
    MissingDevice(DeviceRole),
    MissingBone(HumanBone),
}

/// What one `update` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IkFrameOutcome {
    Skipped(SkipReason),
    Captured,
    Solved,
}

/// Where the visible controller model sits relative to its tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControllerProxy {
    /// At the tracker's own origin
    AttachmentOrigin,
    /// Pinned to the palm, world position
    Pinned(Vector3<f64>),
}

/// Per-frame collaborators of the engine.
pub struct IkFrame<'a> {
    pub profile: &'a BodyProfile,
    pub source: &'a dyn PoseSource,
    pub policy: StylePolicy,
    pub controller_shape: &'a ControllerShape,
    pub scene: Option<&'a dyn SdfScene>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Per-avatar IK state. Re-entering calibration builds a fresh engine.
pub struct IkEngine {
    properties: AvatarProperties,
    fingers: Option<FingerSolver>,
    phase: IkPhase,
    initial_local_hips: Option<UnitQuaternion<f64>>,
    initial_world_spine: Option<UnitQuaternion<f64>>,
    initial_world_head: Option<UnitQuaternion<f64>>,
    reference: Vector3<f64>,
    last_hand_rotation: [Option<UnitQuaternion<f64>>; 2],
    proxies: [ControllerProxy; 2],
    last_skip: Option<SkipReason>,
}

impl IkEngine {
    /// Records the skeleton's start-up rotations and finger references.
    pub fn new<S: HumanoidSkeleton + ?Sized>(
        skeleton: &S,
        properties: AvatarProperties,
        finger_config: FingerSolverConfig,
    ) -> Self {
        let fingers = match FingerSolver::new(skeleton, finger_config) {
            Ok(solver) => Some(solver),
            Err(e) => {
                debug!("Finger solving disabled: {}", e);
                None
            }
        };
        Self {
            properties,
            fingers,
            phase: IkPhase::Inactive,
            initial_local_hips: skeleton.local_rotation(HumanBone::Hips),
            initial_world_spine: skeleton.world_rotation(HumanBone::Spine),
            initial_world_head: skeleton.world_rotation(HumanBone::Head),
            reference: Vector3::y(),
            last_hand_rotation: [None; 2],
            proxies: [ControllerProxy::AttachmentOrigin; 2],
            last_skip: None,
        }
    }

    pub fn phase(&self) -> IkPhase {
        self.phase
    }

    /// Root-to-head-centre direction captured in T-pose, in body space.
    pub fn reference(&self) -> Option<Vector3<f64>> {
        (self.phase != IkPhase::Inactive).then_some(self.reference)
    }

    pub fn fingers(&self) -> Option<&FingerSolver> {
        self.fingers.as_ref()
    }

    pub fn properties(&self) -> &AvatarProperties {
        &self.properties
    }

    pub fn controller_proxy(&self, side: Side) -> ControllerProxy {
        self.proxies[side_index(side)]
    }

    /// Runs one frame.
    pub fn update<S: HumanoidSkeleton + ?Sized>(
        &mut self,
        skeleton: &mut S,
        frame: &IkFrame<'_>,
    ) -> IkFrameOutcome {
        match self.try_update(skeleton, frame) {
            Ok(outcome) => {
                self.last_skip = None;
                outcome
            }
            Err(reason) => {
                if self.last_skip != Some(reason) {
                    debug!("IK frame skipped: {:?}", reason);
                    self.last_skip = Some(reason);
                }
                IkFrameOutcome::Skipped(reason)
            }
        }
    }

    fn try_update<S: HumanoidSkeleton + ?Sized>(
        &mut self,
        skeleton: &mut S,
        frame: &IkFrame<'_>,
    ) -> Result<IkFrameOutcome, SkipReason> {
        if let Some(bone) = REQUIRED_BONES.iter().find(|b| !skeleton.has_bone(**b)) {
            return Err(SkipReason::MissingBone(*bone));
        }
        let (Some(hips), Some(spine), Some(head_bone)) = (
            self.initial_local_hips,
            self.initial_world_spine,
            self.initial_world_head,
        ) else {
            return Err(SkipReason::MissingBone(HumanBone::Hips));
        };
        let anchors = frame
            .profile
            .anchors()
            .resolve(frame.source)
            .map_err(SkipReason::MissingAnchor)?;
        let head = frame
            .source
            .pose(DeviceRole::Head)
            .ok_or(SkipReason::MissingDevice(DeviceRole::Head))?;
        let pelvis = frame
            .source
            .pose(DeviceRole::Pelvis)
            .ok_or(SkipReason::MissingDevice(DeviceRole::Pelvis))?;
        let center_head = frame.profile.measures().center_head(&head);

        match self.phase {
            IkPhase::Inactive => {
                let body = skeleton
                    .body_rotation()
                    .ok_or(SkipReason::MissingBone(HumanBone::Hips))?;
                let reference = body.inverse() * (center_head - pelvis.position);
                self.reference = reference
                    .try_normalize(f64::EPSILON)
                    .unwrap_or_else(Vector3::y);
                self.phase = IkPhase::ReferenceCaptured;
                info!("IK reference captured: {:?}", self.reference);
                return Ok(IkFrameOutcome::Captured);
            }
            IkPhase::ReferenceCaptured => self.phase = IkPhase::Active,
            IkPhase::Active => {}
        }

        skeleton.begin_frame();
        let hand_goals = self.pre_solve(skeleton, &anchors, hips, spine, head_bone, center_head, pelvis.position);
        skeleton.resolve_ik();
        self.post_solve(skeleton, frame, &anchors, hand_goals);
        Ok(IkFrameOutcome::Solved)
    }

    /// Writes body rotations and limb targets. Returns where each hand bone
    /// should end up, right first.
    #[allow(clippy::too_many_arguments)]
    fn pre_solve<S: HumanoidSkeleton + ?Sized>(
        &self,
        skeleton: &mut S,
        anchors: &AnchorPoses,
        initial_hips: UnitQuaternion<f64>,
        initial_spine: UnitQuaternion<f64>,
        initial_head: UnitQuaternion<f64>,
        center_head: Vector3<f64>,
        pelvis: Vector3<f64>,
    ) -> [Vector3<f64>; 2] {
        let root = anchors.root;
        let hips_position = skeleton
            .world_position(HumanBone::Hips)
            .unwrap_or(root.position);
        let hips_offset = root.position - hips_position;

        // Root: only the delta from bind is applied
        let parent = skeleton
            .parent_world_rotation(HumanBone::Hips)
            .unwrap_or_else(UnitQuaternion::identity);
        skeleton.set_local_rotation(HumanBone::Hips, parent.inverse() * root.rotation * initial_hips);

        // Spine follows the head centre, head follows the neck anchor
        let live = root.rotation.inverse() * (center_head - pelvis);
        let bend = from_to_rotation(&self.reference, &live);
        skeleton.set_world_rotation(HumanBone::Spine, root.rotation * bend * initial_spine);
        skeleton.set_world_rotation(HumanBone::Head, anchors.neck.rotation * initial_head);

        let scale = skeleton.scale();
        let mut hand_goals = [Vector3::zeros(); 2];
        for side in Side::BOTH {
            let wrist = match side {
                Side::Left => anchors.wrist_left,
                Side::Right => anchors.wrist_right,
            };
            let shifted = wrist.position - hips_offset;
            let last = self.last_hand_rotation[side_index(side)]
                .or_else(|| skeleton.world_rotation(HumanBone::Hand(side)))
                .unwrap_or(wrist.rotation);
            let grab = shifted + last * (self.properties.grab_position(side) * scale);
            let target = shifted * 2.0 - grab;
            skeleton.set_ik_target(IkGoal::hand(side), IkTarget::full(target, wrist.rotation));
            hand_goals[side_index(side)] = target + hips_offset;

            let ankle = match side {
                Side::Left => anchors.ankle_left,
                Side::Right => anchors.ankle_right,
            };
            skeleton.set_ik_target(
                IkGoal::foot(side),
                IkTarget::full(ankle.position - hips_offset, ankle.rotation),
            );
        }
        hand_goals
    }

    fn post_solve<S: HumanoidSkeleton + ?Sized>(
        &mut self,
        skeleton: &mut S,
        frame: &IkFrame<'_>,
        anchors: &AnchorPoses,
        hand_goals: [Vector3<f64>; 2],
    ) {
        let policy = frame.policy;
        skeleton.set_world_position(HumanBone::Hips, anchors.root.position);

        if policy.attached {
            for side in Side::BOTH {
                let bone = HumanBone::Hand(side);
                if let Some(local) = skeleton.local_rotation(bone) {
                    let offset = euler_degrees_v(&self.properties.hand_rotation(side));
                    skeleton.set_local_rotation(bone, local * offset);
                }
            }
        }

        if policy.stretch {
            for side in Side::BOTH {
                stretch_arm(skeleton, side, &hand_goals[side_index(side)]);
            }
        }

        self.bend_fingers(skeleton, frame);

        for side in Side::BOTH {
            let i = side_index(side);
            self.last_hand_rotation[i] = skeleton.world_rotation(HumanBone::Hand(side));
            self.proxies[i] = match (policy.clamp, self.grab_point(skeleton, side), frame.source.pose(hand_role(side))) {
                (true, Some(grab), Some(tracker)) => {
                    ControllerProxy::Pinned(pinned_proxy(&grab, &tracker, self.properties.controller_clamp_offset))
                }
                _ => ControllerProxy::AttachmentOrigin,
            };
        }
    }

    fn bend_fingers<S: HumanoidSkeleton + ?Sized>(&mut self, skeleton: &mut S, frame: &IkFrame<'_>) {
        let palms = Side::BOTH.map(|side| self.grab_point(skeleton, side));
        let Some(fingers) = self.fingers.as_mut() else {
            return;
        };
        match frame.policy.fingers {
            FingerPolicy::Open => fingers.apply_open(skeleton),
            FingerPolicy::Uniform(t) => fingers.apply_uniform(skeleton, t),
            FingerPolicy::Automatic => {
                for side in Side::BOTH {
                    if let Some(controller) = frame.source.pose(hand_role(side)) {
                        fingers.solve_controller(skeleton, side, frame.controller_shape, &controller);
                    }
                }
            }
            FingerPolicy::Objects => {
                let Some(scene) = frame.scene else {
                    return;
                };
                for side in Side::BOTH {
                    if let Some(palm) = palms[side_index(side)] {
                        fingers.solve_objects(skeleton, side, &palm, scene);
                    }
                }
            }
        }
    }

    /// World position of a palm's grab point.
    pub fn grab_point<S: HumanoidSkeleton + ?Sized>(&self, skeleton: &S, side: Side) -> Option<Vector3<f64>> {
        skeleton.transform_point(HumanBone::Hand(side), &self.properties.grab_position(side))
    }
}

/// Slides the forearm toward `goal` when the solved hand fell short of it.
///
/// `goal` is the world hand IK target (the grab-point extrapolation of the
/// wrist anchor), not the wrist anchor itself, so the stretch closes exactly
/// the gap the two-bone solve left. A goal within reach leaves the arm alone.
/// Returns the distance moved.
pub fn stretch_arm<S: HumanoidSkeleton + ?Sized>(
    skeleton: &mut S,
    side: Side,
    goal: &Vector3<f64>,
) -> Option<f64> {
    let lower = skeleton.world_position(HumanBone::LowerArm(side))?;
    let hand = skeleton.world_position(HumanBone::Hand(side))?;
    let shortfall = (goal - hand).norm();
    if shortfall <= STRETCH_EPSILON || (goal - lower).norm() <= (hand - lower).norm() {
        return None;
    }
    let direction = (hand - lower).try_normalize(f64::EPSILON)?;
    skeleton.set_world_position(HumanBone::LowerArm(side), lower + direction * shortfall);
    Some(shortfall)
}

/// Controller model position that keeps the grip in the palm.
pub fn pinned_proxy(grab: &Vector3<f64>, tracker: &TrackedPose, offset: f64) -> Vector3<f64> {
    grab + tracker.rotation * Vector3::new(0.0, 0.0, offset)
}
