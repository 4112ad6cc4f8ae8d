//! Finger bending by per-joint coordinate descent.
//!
//! Each of the ten finger chains blends every joint between an open and a
//! closed rotation with a persisted parameter `t`. Automatic and Objects
//! modes take one finite-difference step per joint per frame against a
//! signed distance, warm-starting from the previous frame's blends.
//!
//! ```text
//!   proximal ── intermediate ── distal ── tip
//!                    p1            p2      p3 = p2 + up * |p2 - p1| * fraction
//!   score = Σ penalize(sdf(p)) [+ max(separator(p), 0) for non-thumbs]
//! ```
//!
//! A step is kept only when it does not raise the chain score, so one pass
//! never makes a chain worse than it started.

use crate::config::FingerSolverConfig;
use crate::math::{euler_degrees, slerp_unclamped};
use crate::sdf::{ControllerShape, SdfScene};
use crate::skeleton::{Digit, HumanBone, HumanoidSkeleton, Phalanx, Side};
use marionette_env::TrackedPose;
use nalgebra::{UnitQuaternion, Vector3};
use thiserror::Error;

/// Weight on penetration depth.
const NEGATIVE_PENALTY: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FingerError {
    #[error("Skeleton has no {0:?} bone")]
    MissingBone(HumanBone),
}

fn penalize(distance: f64) -> f64 {
    if distance < 0.0 {
        -NEGATIVE_PENALTY * distance
    } else {
        distance
    }
}

fn side_index(side: Side) -> usize {
    match side {
        Side::Right => 0,
        Side::Left => 1,
    }
}

// ============================================================================
// CHAIN
// ============================================================================

/// Three finger joints with their blend targets and parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerChain {
    pub side: Side,
    pub digit: Digit,
    joints: [HumanBone; 3],
    open: [UnitQuaternion<f64>; 3],
    closed: [UnitQuaternion<f64>; 3],
    t: [f64; 3],
}

impl FingerChain {
    fn new<S: HumanoidSkeleton + ?Sized>(
        skeleton: &S,
        side: Side,
        digit: Digit,
        config: &FingerSolverConfig,
    ) -> Result<Self, FingerError> {
        let joints = Phalanx::ALL.map(|p| HumanBone::Finger(side, digit, p));
        let mut open = [UnitQuaternion::identity(); 3];
        for (slot, bone) in open.iter_mut().zip(joints) {
            *slot = skeleton
                .local_rotation(bone)
                .ok_or(FingerError::MissingBone(bone))?;
        }
        let close = if digit.is_thumb() {
            euler_degrees(0.0, 0.0, -config.thumb_closed_roll_deg * side.sign())
        } else {
            euler_degrees(config.closed_curl_deg, 0.0, 0.0)
        };
        Ok(Self {
            side,
            digit,
            joints,
            open,
            closed: open.map(|q| q * close),
            t: [0.0; 3],
        })
    }

    /// Blend parameters, proximal first.
    pub fn t(&self) -> [f64; 3] {
        self.t
    }

    pub fn is_thumb(&self) -> bool {
        self.digit.is_thumb()
    }

    fn blend(&self, joint: usize, t: f64) -> UnitQuaternion<f64> {
        slerp_unclamped(&self.open[joint], &self.closed[joint], t)
    }

    /// Intermediate joint, distal joint and synthetic fingertip.
    fn points<S: HumanoidSkeleton + ?Sized>(
        &self,
        skeleton: &S,
        fraction: f64,
    ) -> Option<[Vector3<f64>; 3]> {
        let p1 = skeleton.world_position(self.joints[1])?;
        let distal = skeleton.world_pose(self.joints[2])?;
        let tip = distal.position + distal.up() * (distal.position - p1).norm() * fraction;
        Some([p1, distal.position, tip])
    }
}

// ============================================================================
// SOLVER
// ============================================================================

/// Clamp range and step size of one descent.
#[derive(Debug, Clone, Copy)]
struct StepRule {
    rate: f64,
    bounds: (f64, f64),
}

/// Persistent finger state for both hands.
#[derive(Debug, Clone)]
pub struct FingerSolver {
    config: FingerSolverConfig,
    /// Right hand first; index, middle, little, ring, thumb
    chains: Vec<FingerChain>,
    /// Thumb twist per hand in [0, 1], right first
    thumb_twist: [f64; 2],
}

impl FingerSolver {
    /// Records open and closed rotations from the skeleton's current pose.
    pub fn new<S: HumanoidSkeleton + ?Sized>(
        skeleton: &S,
        config: FingerSolverConfig,
    ) -> Result<Self, FingerError> {
        let mut chains = Vec::with_capacity(10);
        for side in Side::BOTH {
            for digit in Digit::ALL {
                chains.push(FingerChain::new(skeleton, side, digit, &config)?);
            }
        }
        Ok(Self {
            config,
            chains,
            thumb_twist: [0.0; 2],
        })
    }

    pub fn chains(&self) -> &[FingerChain] {
        &self.chains
    }

    pub fn chain(&self, side: Side, digit: Digit) -> Option<&FingerChain> {
        self.chains
            .iter()
            .find(|c| c.side == side && c.digit == digit)
    }

    pub fn thumb_twist(&self, side: Side) -> f64 {
        self.thumb_twist[side_index(side)]
    }

    pub fn config(&self) -> &FingerSolverConfig {
        &self.config
    }

    /// Every joint at its open rotation. Blend parameters are kept.
    pub fn apply_open<S: HumanoidSkeleton + ?Sized>(&self, skeleton: &mut S) {
        for chain in &self.chains {
            for (bone, open) in chain.joints.iter().zip(&chain.open) {
                skeleton.set_local_rotation(*bone, *open);
            }
        }
    }

    /// Every joint at the same blend.
    pub fn apply_uniform<S: HumanoidSkeleton + ?Sized>(&self, skeleton: &mut S, t: f64) {
        for chain in &self.chains {
            for (i, bone) in chain.joints.iter().enumerate() {
                skeleton.set_local_rotation(*bone, chain.blend(i, t));
            }
        }
    }

    /// Bends one hand around a held controller.
    pub fn solve_controller<S: HumanoidSkeleton + ?Sized>(
        &mut self,
        skeleton: &mut S,
        side: Side,
        shape: &ControllerShape,
        controller: &TrackedPose,
    ) {
        let rule = StepRule {
            rate: self.config.learning_rate,
            bounds: (0.0, 1.0),
        };
        let thumb_rule = StepRule {
            rate: self.config.learning_rate,
            bounds: (-1.0, 1.0),
        };
        for c in self.hand_chains(side) {
            let thumb = self.chains[c].is_thumb();
            let score = |points: &[Vector3<f64>; 3]| {
                points
                    .iter()
                    .map(|p| {
                        let separator = if thumb {
                            0.0
                        } else {
                            shape.separator_distance(controller, p).max(0.0)
                        };
                        penalize(shape.grip_distance(controller, p)) + separator
                    })
                    .sum::<f64>()
            };
            let plane: &dyn Fn(&[Vector3<f64>; 3]) -> f64 = &|points| {
                points
                    .iter()
                    .map(|p| shape.thumb_plane_distance(controller, p))
                    .sum::<f64>()
            };
            let rule = if thumb { thumb_rule } else { rule };
            self.descend(skeleton, c, rule, true, &score, Some(plane));
        }
    }

    /// Bends one hand around whatever the palm touches, or relaxes it.
    pub fn solve_objects<S, W>(&mut self, skeleton: &mut S, side: Side, palm: &Vector3<f64>, scene: &W)
    where
        S: HumanoidSkeleton + ?Sized,
        W: SdfScene + ?Sized,
    {
        let Some(sdf) = scene.overlap(palm, self.config.overlap_radius) else {
            self.relax(skeleton, side);
            return;
        };
        let rule = StepRule {
            rate: self.config.objects_learning_rate,
            bounds: (0.0, self.config.objects_max_blend),
        };
        let thumb_rule = StepRule {
            rate: self.config.objects_learning_rate * self.config.thumb_objects_multiplier,
            bounds: (-1.0, 1.0),
        };
        let score = |points: &[Vector3<f64>; 3]| points.iter().map(|p| penalize(sdf.distance(p))).sum::<f64>();
        for c in self.hand_chains(side) {
            let rule = if self.chains[c].is_thumb() { thumb_rule } else { rule };
            self.descend(skeleton, c, rule, false, &score, None);
        }
    }

    /// Controller score of one chain in the skeleton's current pose.
    pub fn controller_score<S: HumanoidSkeleton + ?Sized>(
        &self,
        skeleton: &S,
        side: Side,
        digit: Digit,
        shape: &ControllerShape,
        controller: &TrackedPose,
    ) -> Option<f64> {
        let chain = self.chain(side, digit)?;
        let points = chain.points(skeleton, self.config.last_joint_fraction)?;
        Some(
            points
                .iter()
                .map(|p| {
                    let separator = if chain.is_thumb() {
                        0.0
                    } else {
                        shape.separator_distance(controller, p).max(0.0)
                    };
                    penalize(shape.grip_distance(controller, p)) + separator
                })
                .sum(),
        )
    }

    fn hand_chains(&self, side: Side) -> std::ops::Range<usize> {
        let start = side_index(side) * Digit::ALL.len();
        start..start + Digit::ALL.len()
    }

    fn twist_rotation(&self, twist: f64) -> UnitQuaternion<f64> {
        euler_degrees(self.config.max_thumb_twist_deg * twist, 0.0, 0.0)
    }

    fn joint_rotation(&self, c: usize, joint: usize, t: f64, twist: Option<f64>) -> UnitQuaternion<f64> {
        let chain = &self.chains[c];
        let blended = chain.blend(joint, t);
        match twist {
            Some(x) if chain.is_thumb() && joint == 0 => blended * self.twist_rotation(x),
            _ => blended,
        }
    }

    fn set_joint<S: HumanoidSkeleton + ?Sized>(
        &self,
        skeleton: &mut S,
        c: usize,
        joint: usize,
        t: f64,
        twist: Option<f64>,
    ) {
        let rotation = self.joint_rotation(c, joint, t, twist);
        skeleton.set_local_rotation(self.chains[c].joints[joint], rotation);
    }

    fn chain_score<S, F>(&self, skeleton: &S, c: usize, score: &F) -> Option<f64>
    where
        S: HumanoidSkeleton + ?Sized,
        F: Fn(&[Vector3<f64>; 3]) -> f64,
    {
        self.chains[c]
            .points(skeleton, self.config.last_joint_fraction)
            .map(|p| score(&p))
    }

    /// One coordinate-descent pass over a chain.
    fn descend<S, F>(
        &mut self,
        skeleton: &mut S,
        c: usize,
        rule: StepRule,
        with_twist: bool,
        score: &F,
        plane: Option<&dyn Fn(&[Vector3<f64>; 3]) -> f64>,
    ) where
        S: HumanoidSkeleton + ?Sized,
        F: Fn(&[Vector3<f64>; 3]) -> f64,
    {
        let h = self.config.sampling_distance;
        let side = side_index(self.chains[c].side);
        let twist = |solver: &Self| with_twist.then(|| solver.thumb_twist[side]);

        // Warm start from the persisted blends
        for joint in 0..3 {
            self.set_joint(skeleton, c, joint, self.chains[c].t[joint], twist(self));
        }

        for joint in 0..3 {
            let Some(before) = self.chain_score(skeleton, c, score) else {
                return;
            };
            let t0 = self.chains[c].t[joint];

            self.set_joint(skeleton, c, joint, t0 + h, twist(self));
            let Some(probe) = self.chain_score(skeleton, c, score) else {
                return;
            };
            let gradient = (probe - before) / h;
            let t1 = (t0 - rule.rate * gradient).clamp(rule.bounds.0, rule.bounds.1);

            self.set_joint(skeleton, c, joint, t1, twist(self));
            match self.chain_score(skeleton, c, score) {
                Some(after) if after <= before => self.chains[c].t[joint] = t1,
                _ => self.set_joint(skeleton, c, joint, t0, twist(self)),
            }

            if joint == 0 && with_twist && self.chains[c].is_thumb() {
                if let Some(plane) = plane {
                    self.twist_step(skeleton, c, score, plane);
                }
            }

            match self.chain_score(skeleton, c, score) {
                Some(s) if s < self.config.early_stop => break,
                Some(_) => {}
                None => return,
            }
        }
    }

    /// One descent step on the thumb twist toward the thumb plane.
    fn twist_step<S, F>(
        &mut self,
        skeleton: &mut S,
        c: usize,
        score: &F,
        plane: &dyn Fn(&[Vector3<f64>; 3]) -> f64,
    ) where
        S: HumanoidSkeleton + ?Sized,
        F: Fn(&[Vector3<f64>; 3]) -> f64,
    {
        let fraction = self.config.last_joint_fraction;
        let h = self.config.sampling_distance;
        let side = side_index(self.chains[c].side);
        let t = self.chains[c].t[0];
        let x0 = self.thumb_twist[side];

        let Some(points) = self.chains[c].points(skeleton, fraction) else {
            return;
        };
        let plane0 = plane(&points);
        if plane0 <= self.config.thumb_twist_threshold {
            return;
        }
        let score0 = score(&points);

        self.set_joint(skeleton, c, 0, t, Some(x0 + h));
        let Some(points) = self.chains[c].points(skeleton, fraction) else {
            return;
        };
        let gradient = (plane(&points) - plane0) / h;
        let x1 = (x0 - self.config.learning_rate * gradient).clamp(0.0, 1.0);

        self.set_joint(skeleton, c, 0, t, Some(x1));
        let accepted = self.chains[c]
            .points(skeleton, fraction)
            .map_or(false, |p| plane(&p) <= plane0 && score(&p) <= score0);
        if accepted {
            self.thumb_twist[side] = x1;
        } else {
            self.set_joint(skeleton, c, 0, t, Some(x0));
        }
    }

    /// Drifts a hand toward slightly open while nothing is held.
    fn relax<S: HumanoidSkeleton + ?Sized>(&mut self, skeleton: &mut S, side: Side) {
        let rate = self.config.relax_rate;
        for c in self.hand_chains(side) {
            let thumb = self.chains[c].is_thumb();
            for joint in 0..3 {
                let t = self.chains[c].t[joint];
                let next = if !thumb {
                    (t - rate).clamp(0.1, 1.0)
                } else if t > 0.1 {
                    (t - rate).clamp(0.1, 1.0)
                } else {
                    (t + rate).clamp(-0.9, 0.1)
                };
                self.chains[c].t[joint] = next;
                self.set_joint(skeleton, c, joint, next, None);
            }
        }
    }
}
