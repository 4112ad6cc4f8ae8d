//! Humanoid skeleton interface.
//!
//! The engines talk to the host animation system only through
//! [`HumanoidSkeleton`]: named bone transforms plus four two-bone IK goals
//! that the host resolves once per tick after the targets are written.

use marionette_env::TrackedPose;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Body side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Right, Side::Left];

    /// -1 for left, +1 for right.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Left => -1.0,
            Side::Right => 1.0,
        }
    }
}

/// Finger of a hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Digit {
    Index,
    Middle,
    Little,
    Ring,
    Thumb,
}

impl Digit {
    /// Solver order within a hand.
    pub const ALL: [Digit; 5] = [
        Digit::Index,
        Digit::Middle,
        Digit::Little,
        Digit::Ring,
        Digit::Thumb,
    ];

    pub fn is_thumb(&self) -> bool {
        matches!(self, Digit::Thumb)
    }
}

/// Finger segment, from knuckle to tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phalanx {
    Proximal,
    Intermediate,
    Distal,
}

impl Phalanx {
    pub const ALL: [Phalanx; 3] = [Phalanx::Proximal, Phalanx::Intermediate, Phalanx::Distal];
}

/// Named humanoid bones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HumanBone {
    Hips,
    Spine,
    Chest,
    Neck,
    Head,
    UpperArm(Side),
    LowerArm(Side),
    Hand(Side),
    UpperLeg(Side),
    LowerLeg(Side),
    Foot(Side),
    Toes(Side),
    Finger(Side, Digit, Phalanx),
}

/// End effectors resolved by the host IK pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IkGoal {
    LeftHand,
    RightHand,
    LeftFoot,
    RightFoot,
}

impl IkGoal {
    pub const ALL: [IkGoal; 4] = [IkGoal::LeftHand, IkGoal::RightHand, IkGoal::LeftFoot, IkGoal::RightFoot];

    pub fn hand(side: Side) -> Self {
        match side {
            Side::Left => IkGoal::LeftHand,
            Side::Right => IkGoal::RightHand,
        }
    }

    pub fn foot(side: Side) -> Self {
        match side {
            Side::Left => IkGoal::LeftFoot,
            Side::Right => IkGoal::RightFoot,
        }
    }

    /// Upper, lower and end bone of the limb.
    pub fn chain(&self) -> [HumanBone; 3] {
        match self {
            IkGoal::LeftHand => [
                HumanBone::UpperArm(Side::Left),
                HumanBone::LowerArm(Side::Left),
                HumanBone::Hand(Side::Left),
            ],
            IkGoal::RightHand => [
                HumanBone::UpperArm(Side::Right),
                HumanBone::LowerArm(Side::Right),
                HumanBone::Hand(Side::Right),
            ],
            IkGoal::LeftFoot => [
                HumanBone::UpperLeg(Side::Left),
                HumanBone::LowerLeg(Side::Left),
                HumanBone::Foot(Side::Left),
            ],
            IkGoal::RightFoot => [
                HumanBone::UpperLeg(Side::Right),
                HumanBone::LowerLeg(Side::Right),
                HumanBone::Foot(Side::Right),
            ],
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            IkGoal::LeftHand => 0,
            IkGoal::RightHand => 1,
            IkGoal::LeftFoot => 2,
            IkGoal::RightFoot => 3,
        }
    }
}

/// Target for one end effector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IkTarget {
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    pub position_weight: f64,
    pub rotation_weight: f64,
}

impl IkTarget {
    /// Fully weighted target.
    pub fn full(position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self {
            position,
            rotation,
            position_weight: 1.0,
            rotation_weight: 1.0,
        }
    }
}

/// Host animation system as seen by the engines.
///
/// Setters return `false` when the bone does not exist.
pub trait HumanoidSkeleton {
    fn has_bone(&self, bone: HumanBone) -> bool;

    fn local_rotation(&self, bone: HumanBone) -> Option<UnitQuaternion<f64>>;

    fn set_local_rotation(&mut self, bone: HumanBone, rotation: UnitQuaternion<f64>) -> bool;

    fn world_pose(&self, bone: HumanBone) -> Option<TrackedPose>;

    /// World rotation of the bone's parent (the avatar root for the hips).
    fn parent_world_rotation(&self, bone: HumanBone) -> Option<UnitQuaternion<f64>>;

    /// Moves a bone (and its subtree) to a world position.
    fn set_world_position(&mut self, bone: HumanBone, position: Vector3<f64>) -> bool;

    /// Writes an end-effector target for the next `resolve_ik`.
    fn set_ik_target(&mut self, goal: IkGoal, target: IkTarget);

    /// Runs the host's limb IK against the written targets.
    fn resolve_ik(&mut self);

    /// Lets the host re-evaluate its base animation pose for a new frame.
    fn begin_frame(&mut self) {}

    /// Uniform scale of the avatar.
    fn scale(&self) -> f64 {
        1.0
    }

    /// Position of the avatar's root object.
    fn avatar_position(&self) -> Vector3<f64>;

    fn set_avatar_position(&mut self, position: Vector3<f64>);

    /// Rotation of the whole body, used as the frame for the spine reference.
    fn body_rotation(&self) -> Option<UnitQuaternion<f64>> {
        self.world_rotation(HumanBone::Hips)
    }

    fn world_position(&self, bone: HumanBone) -> Option<Vector3<f64>> {
        self.world_pose(bone).map(|p| p.position)
    }

    fn world_rotation(&self, bone: HumanBone) -> Option<UnitQuaternion<f64>> {
        self.world_pose(bone).map(|p| p.rotation)
    }

    /// Sets a world rotation by converting through the parent.
    fn set_world_rotation(&mut self, bone: HumanBone, rotation: UnitQuaternion<f64>) -> bool {
        match self.parent_world_rotation(bone) {
            Some(parent) => self.set_local_rotation(bone, parent.inverse() * rotation),
            None => false,
        }
    }

    /// Maps a bone-local point to world space, honoring avatar scale.
    fn transform_point(&self, bone: HumanBone, local: &Vector3<f64>) -> Option<Vector3<f64>> {
        let scale = self.scale();
        self.world_pose(bone)
            .map(|p| p.transform_point(&(local * scale)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_chains() {
        assert_eq!(IkGoal::hand(Side::Left).chain()[2], HumanBone::Hand(Side::Left));
        assert_eq!(IkGoal::foot(Side::Right).chain()[0], HumanBone::UpperLeg(Side::Right));
        let idx: Vec<usize> = IkGoal::ALL.iter().map(|g| g.index()).collect();
        assert_eq!(idx, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_digit_order_ends_with_thumb() {
        assert!(Digit::ALL[4].is_thumb());
        assert!(Digit::ALL[..4].iter().all(|d| !d.is_thumb()));
        assert_eq!(Side::Left.sign(), -1.0);
    }
}
