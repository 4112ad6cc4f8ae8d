//! Reference humanoid rig for headless runs.
//!
//! A flat transform hierarchy with a uniform avatar scale, a bind pose the
//! rig returns to at the start of every frame, and an analytic two-bone
//! solver standing in for the host animation system's limb IK.

use crate::math::{any_perpendicular, frame_along, from_to_rotation, slerp_unclamped};
use crate::skeleton::{Digit, HumanBone, HumanoidSkeleton, IkGoal, IkTarget, Phalanx, Side};
use marionette_env::TrackedPose;
use nalgebra::{Unit, UnitQuaternion, Vector3};
use std::collections::HashMap;

/// Clearance kept from a fully straight limb
const IK_STRAIGHT_MARGIN: f64 = 1e-4;

// ============================================================================
// TEMPLATE
// ============================================================================

/// Bind-pose description of one bone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneSpec {
    pub bone: HumanBone,
    pub parent: Option<HumanBone>,
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
}

/// Proportions of an unscaled T-pose humanoid facing +Z with feet at the origin.
#[derive(Debug, Clone)]
pub struct RigTemplate {
    /// Eye height of the unscaled rig (default: 1.60 m)
    pub nominal_eye_height: f64,

    /// Eye point in head-local space
    pub eye_offset: Vector3<f64>,

    bones: Vec<BoneSpec>,
}

impl RigTemplate {
    /// Default humanoid with 30 finger bones.
    pub fn humanoid() -> Self {
        let mut t = Self {
            nominal_eye_height: 1.60,
            eye_offset: Vector3::new(0.0, 0.05, 0.09),
            bones: Vec::new(),
        };

        t.push(HumanBone::Hips, None, Vector3::new(0.0, 0.95, 0.0));
        t.push(HumanBone::Spine, Some(HumanBone::Hips), Vector3::new(0.0, 0.10, 0.0));
        t.push(HumanBone::Chest, Some(HumanBone::Spine), Vector3::new(0.0, 0.20, 0.0));
        t.push(HumanBone::Neck, Some(HumanBone::Chest), Vector3::new(0.0, 0.22, 0.0));
        t.push(HumanBone::Head, Some(HumanBone::Neck), Vector3::new(0.0, 0.08, 0.0));

        for side in Side::BOTH {
            let s = side.sign();
            // Elbows bend slightly back and knees slightly forward
            t.push(HumanBone::UpperArm(side), Some(HumanBone::Chest), Vector3::new(s * 0.18, 0.17, 0.0));
            t.push(HumanBone::LowerArm(side), Some(HumanBone::UpperArm(side)), Vector3::new(s * 0.28, 0.0, -0.01));
            t.push(HumanBone::Hand(side), Some(HumanBone::LowerArm(side)), Vector3::new(s * 0.25, 0.0, 0.01));
            t.push(HumanBone::UpperLeg(side), Some(HumanBone::Hips), Vector3::new(s * 0.09, -0.05, 0.0));
            t.push(HumanBone::LowerLeg(side), Some(HumanBone::UpperLeg(side)), Vector3::new(0.0, -0.42, 0.015));
            t.push(HumanBone::Foot(side), Some(HumanBone::LowerLeg(side)), Vector3::new(0.0, -0.40, -0.015));
            t.push(HumanBone::Toes(side), Some(HumanBone::Foot(side)), Vector3::new(0.0, -0.06, 0.13));
            t.push_fingers(side);
        }
        t
    }

    fn push(&mut self, bone: HumanBone, parent: Option<HumanBone>, position: Vector3<f64>) {
        self.push_rotated(bone, parent, position, UnitQuaternion::identity());
    }

    fn push_rotated(
        &mut self,
        bone: HumanBone,
        parent: Option<HumanBone>,
        position: Vector3<f64>,
        rotation: UnitQuaternion<f64>,
    ) {
        self.bones.push(BoneSpec {
            bone,
            parent,
            position,
            rotation,
        });
    }

    fn push_fingers(&mut self, side: Side) {
        let s = side.sign();
        let down = -Vector3::y();
        for digit in Digit::ALL {
            let (base, direction, lengths) = match digit {
                Digit::Index => (Vector3::new(s * 0.09, 0.0, 0.03), Vector3::new(s, 0.0, 0.0), [0.040, 0.025, 0.020]),
                Digit::Middle => (Vector3::new(s * 0.095, 0.0, 0.01), Vector3::new(s, 0.0, 0.0), [0.045, 0.028, 0.022]),
                Digit::Little => (Vector3::new(s * 0.08, 0.0, -0.03), Vector3::new(s, 0.0, 0.0), [0.032, 0.020, 0.018]),
                Digit::Ring => (Vector3::new(s * 0.09, 0.0, -0.01), Vector3::new(s, 0.0, 0.0), [0.040, 0.026, 0.020]),
                Digit::Thumb => (Vector3::new(s * 0.025, -0.01, 0.035), Vector3::new(s * 0.5, -0.15, 0.85), [0.035, 0.030, 0.025]),
            };
            let hand = HumanBone::Hand(side);
            let proximal = HumanBone::Finger(side, digit, Phalanx::Proximal);
            let intermediate = HumanBone::Finger(side, digit, Phalanx::Intermediate);
            let distal = HumanBone::Finger(side, digit, Phalanx::Distal);

            self.push_rotated(proximal, Some(hand), base, frame_along(&direction, &down));
            self.push(intermediate, Some(proximal), Vector3::new(0.0, lengths[0], 0.0));
            self.push(distal, Some(intermediate), Vector3::new(0.0, lengths[1], 0.0));
        }
    }

    /// Drops a bone and every bone below it.
    pub fn without(mut self, bone: HumanBone) -> Self {
        let mut removed = vec![bone];
        self.bones.retain(|spec| {
            let drop = spec.bone == bone || spec.parent.map_or(false, |p| removed.contains(&p));
            if drop {
                removed.push(spec.bone);
            }
            !drop
        });
        self
    }

    pub fn bones(&self) -> &[BoneSpec] {
        &self.bones
    }

    /// Builds a rig scaled so its eyes sit at `eyes_height`.
    pub fn build(&self, eyes_height: f64) -> RigSkeleton {
        let scale = if self.nominal_eye_height > 0.0 && eyes_height > 0.0 {
            eyes_height / self.nominal_eye_height
        } else {
            1.0
        };
        RigSkeleton::from_specs(&self.bones, scale, self.eye_offset)
    }
}

impl Default for RigTemplate {
    fn default() -> Self {
        Self::humanoid()
    }
}

// ============================================================================
// SKELETON
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct RigBone {
    bone: HumanBone,
    parent: Option<usize>,
    local_position: Vector3<f64>,
    local_rotation: UnitQuaternion<f64>,
}

/// Transform-hierarchy skeleton implementing [`HumanoidSkeleton`].
#[derive(Debug, Clone)]
pub struct RigSkeleton {
    bones: Vec<RigBone>,
    bind: Vec<(Vector3<f64>, UnitQuaternion<f64>)>,
    index: HashMap<HumanBone, usize>,
    root: TrackedPose,
    scale: f64,
    eye_offset: Vector3<f64>,
    targets: [Option<IkTarget>; 4],
}

impl RigSkeleton {
    fn from_specs(specs: &[BoneSpec], scale: f64, eye_offset: Vector3<f64>) -> Self {
        let mut index = HashMap::with_capacity(specs.len());
        let mut bones = Vec::with_capacity(specs.len());
        for spec in specs {
            // Parents always precede children in a template
            let parent = spec.parent.and_then(|p| index.get(&p).copied());
            index.insert(spec.bone, bones.len());
            bones.push(RigBone {
                bone: spec.bone,
                parent,
                local_position: spec.position,
                local_rotation: spec.rotation,
            });
        }
        let bind = bones.iter().map(|b| (b.local_position, b.local_rotation)).collect();
        Self {
            bones,
            bind,
            index,
            root: TrackedPose::default(),
            scale,
            eye_offset,
            targets: [None; 4],
        }
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    /// World position of the eyes.
    pub fn eye_position(&self) -> Option<Vector3<f64>> {
        self.transform_point(HumanBone::Head, &self.eye_offset)
    }

    /// Local transforms of every bone, for change detection.
    pub fn local_snapshot(&self) -> Vec<(HumanBone, Vector3<f64>, UnitQuaternion<f64>)> {
        self.bones
            .iter()
            .map(|b| (b.bone, b.local_position, b.local_rotation))
            .collect()
    }

    /// Bind-pose distance between two bones, in world units.
    pub fn bind_distance(&self, a: HumanBone, b: HumanBone) -> Option<f64> {
        let mut bound = self.clone();
        bound.begin_frame();
        Some((bound.world_position(a)? - bound.world_position(b)?).norm())
    }

    /// Target most recently written for a goal, if not yet resolved.
    pub fn pending_target(&self, goal: IkGoal) -> Option<IkTarget> {
        self.targets[goal.index()]
    }

    fn world_of(&self, idx: usize) -> TrackedPose {
        let mut chain = vec![idx];
        let mut cur = self.bones[idx].parent;
        while let Some(p) = cur {
            chain.push(p);
            cur = self.bones[p].parent;
        }
        let mut pose = self.root;
        for &i in chain.iter().rev() {
            let b = &self.bones[i];
            pose = TrackedPose::new(
                pose.position + pose.rotation * (b.local_position * self.scale),
                pose.rotation * b.local_rotation,
            );
        }
        pose
    }

    fn parent_world_of(&self, idx: usize) -> TrackedPose {
        match self.bones[idx].parent {
            Some(p) => self.world_of(p),
            None => self.root,
        }
    }

    fn set_world_rotation_of(&mut self, idx: usize, rotation: UnitQuaternion<f64>) {
        let parent = self.parent_world_of(idx).rotation;
        self.bones[idx].local_rotation = parent.inverse() * rotation;
    }

    fn solve_two_bone(&mut self, [ia, ib, ic]: [usize; 3], target: &IkTarget) {
        let a = self.world_of(ia);
        let b = self.world_of(ib);
        let c = self.world_of(ic);
        let goal = c.position + (target.position - c.position) * target.position_weight;

        let lab = (b.position - a.position).norm();
        let lcb = (c.position - b.position).norm();
        if lab < f64::EPSILON || lcb < f64::EPSILON {
            return;
        }
        let lat = (goal - a.position)
            .norm()
            .clamp(IK_STRAIGHT_MARGIN, lab + lcb - IK_STRAIGHT_MARGIN);

        // Bend: set the shoulder and elbow angles for the reach length
        let ac = c.position - a.position;
        let ab = b.position - a.position;
        let ba = a.position - b.position;
        let bc = c.position - b.position;

        let ac_ab_0 = ac.angle(&ab);
        let ba_bc_0 = ba.angle(&bc);
        let ac_ab_1 = ((lcb * lcb - lab * lab - lat * lat) / (-2.0 * lab * lat))
            .clamp(-1.0, 1.0)
            .acos();
        let ba_bc_1 = ((lat * lat - lab * lab - lcb * lcb) / (-2.0 * lab * lcb))
            .clamp(-1.0, 1.0)
            .acos();

        let mut axis = ac.cross(&ab);
        if axis.norm() < 1e-9 {
            axis = any_perpendicular(&ac).into_inner();
        }
        let axis = axis.normalize();
        let r0 = UnitQuaternion::from_axis_angle(
            &Unit::new_normalize(a.rotation.inverse() * axis),
            ac_ab_1 - ac_ab_0,
        );
        let r1 = UnitQuaternion::from_axis_angle(
            &Unit::new_normalize(b.rotation.inverse() * axis),
            ba_bc_1 - ba_bc_0,
        );
        self.bones[ia].local_rotation *= r0;
        self.bones[ib].local_rotation *= r1;

        // Swing: aim the shoulder-to-end line at the goal
        let a = self.world_of(ia);
        let c = self.world_of(ic);
        let swing = from_to_rotation(&(c.position - a.position), &(goal - a.position));
        self.set_world_rotation_of(ia, swing * a.rotation);

        let current = self.world_of(ic).rotation;
        let desired = if target.rotation_weight >= 1.0 {
            target.rotation
        } else {
            slerp_unclamped(&current, &target.rotation, target.rotation_weight.max(0.0))
        };
        self.set_world_rotation_of(ic, desired);
    }
}

impl HumanoidSkeleton for RigSkeleton {
    fn has_bone(&self, bone: HumanBone) -> bool {
        self.index.contains_key(&bone)
    }

    fn local_rotation(&self, bone: HumanBone) -> Option<UnitQuaternion<f64>> {
        self.index.get(&bone).map(|&i| self.bones[i].local_rotation)
    }

    fn set_local_rotation(&mut self, bone: HumanBone, rotation: UnitQuaternion<f64>) -> bool {
        match self.index.get(&bone) {
            Some(&i) => {
                self.bones[i].local_rotation = rotation;
                true
            }
            None => false,
        }
    }

    fn world_pose(&self, bone: HumanBone) -> Option<TrackedPose> {
        self.index.get(&bone).map(|&i| self.world_of(i))
    }

    fn parent_world_rotation(&self, bone: HumanBone) -> Option<UnitQuaternion<f64>> {
        self.index.get(&bone).map(|&i| self.parent_world_of(i).rotation)
    }

    fn set_world_position(&mut self, bone: HumanBone, position: Vector3<f64>) -> bool {
        let Some(&i) = self.index.get(&bone) else {
            return false;
        };
        let parent = self.parent_world_of(i);
        self.bones[i].local_position = parent.inverse_transform_point(&position) / self.scale;
        true
    }

    fn set_ik_target(&mut self, goal: IkGoal, target: IkTarget) {
        self.targets[goal.index()] = Some(target);
    }

    fn resolve_ik(&mut self) {
        for goal in IkGoal::ALL {
            let Some(target) = self.targets[goal.index()].take() else {
                continue;
            };
            let chain = goal.chain();
            let (Some(&a), Some(&b), Some(&c)) = (
                self.index.get(&chain[0]),
                self.index.get(&chain[1]),
                self.index.get(&chain[2]),
            ) else {
                continue;
            };
            self.solve_two_bone([a, b, c], &target);
        }
    }

    fn begin_frame(&mut self) {
        for (bone, (position, rotation)) in self.bones.iter_mut().zip(&self.bind) {
            bone.local_position = *position;
            bone.local_rotation = *rotation;
        }
        self.targets = [None; 4];
    }

    fn scale(&self) -> f64 {
        self.scale
    }

    fn avatar_position(&self) -> Vector3<f64> {
        self.root.position
    }

    fn set_avatar_position(&mut self, position: Vector3<f64>) {
        self.root.position = position;
    }
}
