//! Body Profile - calibrated proportions and anchor joints.
//!
//! The calibration pipeline is the only writer. The IK engine reads a
//! complete [`AnchorPoses`] set each frame and never sees a half-built
//! profile: T-pose results and root results are committed as whole units.

use crate::driver::PoseSource;
use marionette_env::{DeviceRole, TrackedPose};
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// MEASURES
// ============================================================================

/// Pose of each role captured when the root anchor is committed.
///
/// Replayed to remote observers so they can rebuild the same anchors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RootSteps {
    pub head: TrackedPose,
    pub hand_left: TrackedPose,
    pub hand_right: TrackedPose,
    pub pelvis: TrackedPose,
    pub foot_left: TrackedPose,
    pub foot_right: TrackedPose,
}

impl RootSteps {
    /// Captures all six live poses, or `None` if any role is untracked.
    pub fn capture<S: PoseSource + ?Sized>(source: &S) -> Option<Self> {
        Some(Self {
            head: source.pose(DeviceRole::Head)?,
            hand_left: source.pose(DeviceRole::HandLeft)?,
            hand_right: source.pose(DeviceRole::HandRight)?,
            pelvis: source.pose(DeviceRole::Pelvis)?,
            foot_left: source.pose(DeviceRole::FootLeft)?,
            foot_right: source.pose(DeviceRole::FootRight)?,
        })
    }

    pub fn get(&self, role: DeviceRole) -> TrackedPose {
        match role {
            DeviceRole::Head => self.head,
            DeviceRole::HandLeft => self.hand_left,
            DeviceRole::HandRight => self.hand_right,
            DeviceRole::Pelvis => self.pelvis,
            DeviceRole::FootLeft => self.foot_left,
            DeviceRole::FootRight => self.foot_right,
        }
    }
}

/// Calibrated body proportions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyMeasures {
    /// Left foot tracker to ankle, meters (default: 0.2769778)
    pub foot_to_ankle_left: f64,

    /// Right foot tracker to ankle, meters (default: 0.2772783)
    pub foot_to_ankle_right: f64,

    /// Eye height above the floor, meters (default: 1.68952)
    pub eyes_height: f64,

    /// Head-center offset along the head's forward axis (default: -0.07)
    pub depth_center_head: f64,

    /// Head-center offset along the head's right axis (default: -0.01)
    pub width_center_head: f64,

    /// Set together with the root anchor
    pub root_steps: Option<RootSteps>,
}

impl Default for BodyMeasures {
    fn default() -> Self {
        Self {
            foot_to_ankle_left: 0.2769778,
            foot_to_ankle_right: 0.2772783,
            eyes_height: 1.68952,
            depth_center_head: -0.07,
            width_center_head: -0.01000001,
            root_steps: None,
        }
    }
}

impl BodyMeasures {
    /// True once root-step snapshots exist.
    pub fn is_complete(&self) -> bool {
        self.root_steps.is_some()
    }

    /// Head-center point derived from a live head pose.
    pub fn center_head(&self, head: &TrackedPose) -> Vector3<f64> {
        head.position
            + head.forward() * self.depth_center_head
            + head.right() * self.width_center_head
    }
}

/// Horizontal depth distance between a foot and the pelvis.
pub fn foot_to_ankle(foot: &Vector3<f64>, pelvis: &Vector3<f64>) -> f64 {
    (foot.z - pelvis.z).abs()
}

// ============================================================================
// ANCHORS
// ============================================================================

/// Names of the six synthetic anchor joints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnchorKind {
    AnkleLeft,
    AnkleRight,
    Root,
    WristLeft,
    WristRight,
    Neck,
}

impl AnchorKind {
    /// Creation order.
    pub const ALL: [AnchorKind; 6] = [
        AnchorKind::AnkleLeft,
        AnchorKind::AnkleRight,
        AnchorKind::Root,
        AnchorKind::WristLeft,
        AnchorKind::WristRight,
        AnchorKind::Neck,
    ];

    /// Device role the anchor follows.
    pub fn parent_role(&self) -> DeviceRole {
        match self {
            AnchorKind::AnkleLeft => DeviceRole::FootLeft,
            AnchorKind::AnkleRight => DeviceRole::FootRight,
            AnchorKind::Root => DeviceRole::Pelvis,
            AnchorKind::WristLeft => DeviceRole::HandLeft,
            AnchorKind::WristRight => DeviceRole::HandRight,
            AnchorKind::Neck => DeviceRole::Head,
        }
    }

    /// Anchors that must exist before this one.
    pub fn prerequisites(&self) -> &'static [AnchorKind] {
        match self {
            AnchorKind::AnkleLeft | AnchorKind::AnkleRight => &[],
            AnchorKind::Root => &[AnchorKind::AnkleLeft, AnchorKind::AnkleRight],
            AnchorKind::WristLeft | AnchorKind::WristRight | AnchorKind::Neck => &[AnchorKind::Root],
        }
    }

    fn index(&self) -> usize {
        match self {
            AnchorKind::AnkleLeft => 0,
            AnchorKind::AnkleRight => 1,
            AnchorKind::Root => 2,
            AnchorKind::WristLeft => 3,
            AnchorKind::WristRight => 4,
            AnchorKind::Neck => 5,
        }
    }
}

impl std::fmt::Display for AnchorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AnchorKind::AnkleLeft => "ankle_left",
            AnchorKind::AnkleRight => "ankle_right",
            AnchorKind::Root => "root",
            AnchorKind::WristLeft => "wrist_left",
            AnchorKind::WristRight => "wrist_right",
            AnchorKind::Neck => "neck",
        };
        write!(f, "{}", name)
    }
}

/// A transform rigidly attached to a tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorJoint {
    pub kind: AnchorKind,

    /// Offset and rotation in the parent device's frame
    pub local: TrackedPose,
}

impl AnchorJoint {
    pub fn new(kind: AnchorKind, local: TrackedPose) -> Self {
        Self { kind, local }
    }

    /// Anchor with a world-space offset from its parent, whose world
    /// rotation is identity while the parent holds `parent` pose.
    pub fn from_world_offset(kind: AnchorKind, parent: &TrackedPose, offset: &Vector3<f64>) -> Self {
        Self::new(
            kind,
            TrackedPose::new(parent.inverse_transform_vector(offset), parent.rotation.inverse()),
        )
    }

    /// Anchor with a local offset and identity local rotation.
    pub fn fixed(kind: AnchorKind, offset: Vector3<f64>) -> Self {
        Self::new(kind, TrackedPose::new(offset, UnitQuaternion::identity()))
    }

    /// World pose given the parent's live pose.
    pub fn world_pose(&self, parent: &TrackedPose) -> TrackedPose {
        parent.compose(&self.local)
    }
}

/// Errors raised when writing the profile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("Anchor {anchor} requires {requires} to exist first")]
    AnchorOrder { anchor: AnchorKind, requires: AnchorKind },
}

/// At most one anchor per kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnchorSet {
    slots: [Option<AnchorJoint>; 6],
}

impl AnchorSet {
    pub fn get(&self, kind: AnchorKind) -> Option<&AnchorJoint> {
        self.slots[kind.index()].as_ref()
    }

    pub fn contains(&self, kind: AnchorKind) -> bool {
        self.get(kind).is_some()
    }

    /// Inserts or replaces an anchor, enforcing creation order.
    pub fn insert(&mut self, anchor: AnchorJoint) -> Result<(), ProfileError> {
        if let Some(missing) = anchor
            .kind
            .prerequisites()
            .iter()
            .find(|k| !self.contains(**k))
        {
            return Err(ProfileError::AnchorOrder {
                anchor: anchor.kind,
                requires: *missing,
            });
        }
        self.slots[anchor.kind.index()] = Some(anchor);
        Ok(())
    }

    /// First absent anchor in creation order.
    pub fn first_missing(&self) -> Option<AnchorKind> {
        AnchorKind::ALL.into_iter().find(|k| !self.contains(*k))
    }

    pub fn is_complete(&self) -> bool {
        self.first_missing().is_none()
    }

    /// Live world pose of one anchor.
    pub fn world_pose<S: PoseSource + ?Sized>(
        &self,
        kind: AnchorKind,
        source: &S,
    ) -> Option<TrackedPose> {
        let anchor = self.get(kind)?;
        Some(anchor.world_pose(&source.pose(kind.parent_role())?))
    }

    /// Live world poses of all anchors, or the first one that cannot be resolved.
    pub fn resolve<S: PoseSource + ?Sized>(&self, source: &S) -> Result<AnchorPoses, AnchorKind> {
        let pose = |k: AnchorKind| self.world_pose(k, source).ok_or(k);
        Ok(AnchorPoses {
            ankle_left: pose(AnchorKind::AnkleLeft)?,
            ankle_right: pose(AnchorKind::AnkleRight)?,
            root: pose(AnchorKind::Root)?,
            wrist_left: pose(AnchorKind::WristLeft)?,
            wrist_right: pose(AnchorKind::WristRight)?,
            neck: pose(AnchorKind::Neck)?,
        })
    }
}

/// World poses of every anchor for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorPoses {
    pub ankle_left: TrackedPose,
    pub ankle_right: TrackedPose,
    pub root: TrackedPose,
    pub wrist_left: TrackedPose,
    pub wrist_right: TrackedPose,
    pub neck: TrackedPose,
}

// ============================================================================
// PROFILE
// ============================================================================

/// Result of the T-pose stage, committed as one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TPoseCommit {
    /// `None` when the head was not tracked; keeps the previous eye height
    pub eyes_height: Option<f64>,
    pub foot_to_ankle_left: f64,
    pub foot_to_ankle_right: f64,
    pub ankle_left: AnchorJoint,
    pub ankle_right: AnchorJoint,
}

/// Result of the root stage, committed as one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootCommit {
    pub root: AnchorJoint,
    pub ankle_left: AnchorJoint,
    pub ankle_right: AnchorJoint,
    pub wrist_left: AnchorJoint,
    pub wrist_right: AnchorJoint,
    pub neck: AnchorJoint,
    pub root_steps: RootSteps,
}

/// Everything calibration learns about the user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyProfile {
    measures: BodyMeasures,
    anchors: AnchorSet,
    started: bool,
    completed: bool,
}

impl BodyProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile seeded with externally supplied measures (e.g. from a peer).
    pub fn with_measures(measures: BodyMeasures) -> Self {
        Self {
            measures,
            ..Self::default()
        }
    }

    pub fn measures(&self) -> &BodyMeasures {
        &self.measures
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn set_started(&mut self, started: bool) {
        self.started = started;
    }

    pub fn set_completed(&mut self, completed: bool) {
        self.completed = completed;
    }

    /// Applies T-pose measurements and ankle anchors.
    pub fn commit_tpose(&mut self, commit: TPoseCommit) -> Result<(), ProfileError> {
        let mut anchors = self.anchors.clone();
        anchors.insert(commit.ankle_left)?;
        anchors.insert(commit.ankle_right)?;

        if let Some(eyes) = commit.eyes_height {
            self.measures.eyes_height = eyes;
        }
        self.measures.foot_to_ankle_left = commit.foot_to_ankle_left;
        self.measures.foot_to_ankle_right = commit.foot_to_ankle_right;
        self.anchors = anchors;
        Ok(())
    }

    /// Applies root, wrist, neck and corrected ankle anchors plus root steps.
    ///
    /// Nothing is written unless every anchor passes the order check.
    pub fn commit_root(&mut self, commit: RootCommit) -> Result<(), ProfileError> {
        let mut anchors = self.anchors.clone();
        anchors.insert(commit.ankle_left)?;
        anchors.insert(commit.ankle_right)?;
        anchors.insert(commit.root)?;
        anchors.insert(commit.wrist_left)?;
        anchors.insert(commit.wrist_right)?;
        anchors.insert(commit.neck)?;

        self.anchors = anchors;
        self.measures.root_steps = Some(commit.root_steps);
        Ok(())
    }

    /// Back to defaults.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn ankle(kind: AnchorKind) -> AnchorJoint {
        AnchorJoint::fixed(kind, Vector3::zeros())
    }

    #[test]
    fn test_default_measures() {
        let m = BodyMeasures::default();
        assert_relative_eq!(m.eyes_height, 1.68952);
        assert_relative_eq!(m.depth_center_head, -0.07);
        assert!(!m.is_complete());
    }

    #[test]
    fn test_foot_to_ankle_example() {
        let pelvis = Vector3::new(0.0, 1.0, 0.0);
        assert_relative_eq!(foot_to_ankle(&Vector3::new(-0.1, 0.0, -0.05), &pelvis), 0.05);
        assert_relative_eq!(foot_to_ankle(&Vector3::new(0.1, 0.0, -0.05), &pelvis), 0.05);
    }

    #[test]
    fn test_anchor_from_world_offset() {
        let parent = TrackedPose::new(
            Vector3::new(0.1, 0.0, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.7),
        );
        let anchor =
            AnchorJoint::from_world_offset(AnchorKind::AnkleLeft, &parent, &Vector3::new(0.0, 0.0, -0.05));
        let world = anchor.world_pose(&parent);
        assert_relative_eq!(world.position, Vector3::new(0.1, 0.0, -0.05), epsilon = 1e-12);
        assert_relative_eq!(world.rotation.angle(), 0.0, epsilon = 1e-12);

        // Anchor follows the parent rigidly afterwards
        let moved = TrackedPose::new(parent.position + Vector3::new(0.0, 0.2, 0.0), parent.rotation);
        assert_relative_eq!(
            anchor.world_pose(&moved).position,
            Vector3::new(0.1, 0.2, -0.05),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_anchor_order_enforced() {
        let mut set = AnchorSet::default();
        let err = set.insert(ankle(AnchorKind::Root)).unwrap_err();
        assert_eq!(
            err,
            ProfileError::AnchorOrder {
                anchor: AnchorKind::Root,
                requires: AnchorKind::AnkleLeft
            }
        );
        set.insert(ankle(AnchorKind::AnkleLeft)).unwrap();
        set.insert(ankle(AnchorKind::AnkleRight)).unwrap();
        assert!(set.insert(ankle(AnchorKind::Neck)).is_err());
        set.insert(ankle(AnchorKind::Root)).unwrap();
        set.insert(ankle(AnchorKind::Neck)).unwrap();
        assert_eq!(set.first_missing(), Some(AnchorKind::WristLeft));
    }

    #[test]
    fn test_failed_root_commit_leaves_profile_untouched() {
        let mut profile = BodyProfile::new();
        let steps = RootSteps {
            head: TrackedPose::default(),
            hand_left: TrackedPose::default(),
            hand_right: TrackedPose::default(),
            pelvis: TrackedPose::default(),
            foot_left: TrackedPose::default(),
            foot_right: TrackedPose::default(),
        };
        // Ankles are re-inserted by the commit, so only ordering inside it matters
        let ok = RootCommit {
            root: ankle(AnchorKind::Root),
            ankle_left: ankle(AnchorKind::AnkleLeft),
            ankle_right: ankle(AnchorKind::AnkleRight),
            wrist_left: ankle(AnchorKind::WristLeft),
            wrist_right: ankle(AnchorKind::WristRight),
            neck: ankle(AnchorKind::Neck),
            root_steps: steps,
        };
        let bad = RootCommit {
            ankle_left: ankle(AnchorKind::Neck),
            ..ok
        };
        assert!(profile.commit_root(bad).is_err());
        assert_eq!(profile, BodyProfile::new());

        profile.commit_root(ok).unwrap();
        assert!(profile.anchors().is_complete());
        assert!(profile.measures().is_complete());
    }

    #[test]
    fn test_tpose_commit_keeps_eyes_without_head() {
        let mut profile = BodyProfile::new();
        profile
            .commit_tpose(TPoseCommit {
                eyes_height: None,
                foot_to_ankle_left: 0.1,
                foot_to_ankle_right: 0.12,
                ankle_left: ankle(AnchorKind::AnkleLeft),
                ankle_right: ankle(AnchorKind::AnkleRight),
            })
            .unwrap();
        assert_relative_eq!(profile.measures().eyes_height, 1.68952);
        assert_relative_eq!(profile.measures().foot_to_ankle_right, 0.12);
    }

    #[test]
    fn test_center_head_offsets() {
        let m = BodyMeasures::default();
        let head = TrackedPose::at(Vector3::new(0.0, 1.7, 0.0));
        let c = m.center_head(&head);
        assert_relative_eq!(c, Vector3::new(-0.01000001, 1.7, -0.07), epsilon = 1e-12);
    }

    proptest! {
        #[test]
        fn test_foot_to_ankle_is_pure(
            fx in -1.0f64..1.0, fy in -0.2f64..0.2, fz in -1.0f64..1.0,
            px in -1.0f64..1.0, py in 0.5f64..1.5, pz in -1.0f64..1.0,
        ) {
            let foot = Vector3::new(fx, fy, fz);
            let pelvis = Vector3::new(px, py, pz);
            let d = foot_to_ankle(&foot, &pelvis);
            prop_assert_eq!(d, foot_to_ankle(&foot, &pelvis));
            prop_assert!(d >= 0.0);
            prop_assert!((d - (fz - pz).abs()).abs() < 1e-15);
            // Only depth matters
            let shifted = foot_to_ankle(&Vector3::new(fx + 0.3, fy - 0.1, fz), &Vector3::new(px, py + 0.2, pz));
            prop_assert_eq!(d, shifted);
        }
    }
}
