//! Signed-distance primitives and the controller grip shape.
//!
//! Every shape answers one question: how far is a world point from its
//! surface, negative inside. The finger solvers only ever see that method,
//! either through [`ControllerShape`] or through an [`SdfScene`] overlap query
//! at the palm.

use marionette_env::TrackedPose;
use nalgebra::{Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A surface that can report signed distance to a world point.
pub trait SignedDistance: Send + Sync {
    /// Signed distance from `point` to the surface. Negative inside.
    fn distance(&self, point: &Vector3<f64>) -> f64;
}

// ============================================================================
// PRIMITIVES
// ============================================================================

/// Sphere given by center and radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SphereSdf {
    pub center: Vector3<f64>,
    pub radius: f64,
}

impl SphereSdf {
    pub fn new(center: Vector3<f64>, radius: f64) -> Self {
        Self { center, radius }
    }
}

impl SignedDistance for SphereSdf {
    fn distance(&self, point: &Vector3<f64>) -> f64 {
        (point - self.center).norm() - self.radius
    }
}

/// Oriented box given by center, rotation and full edge lengths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxSdf {
    pub center: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    /// Full edge lengths along local X, Y, Z
    pub size: Vector3<f64>,
}

impl BoxSdf {
    pub fn new(center: Vector3<f64>, rotation: UnitQuaternion<f64>, size: Vector3<f64>) -> Self {
        Self {
            center,
            rotation,
            size,
        }
    }

    /// Axis-aligned box.
    pub fn aligned(center: Vector3<f64>, size: Vector3<f64>) -> Self {
        Self::new(center, UnitQuaternion::identity(), size)
    }
}

impl SignedDistance for BoxSdf {
    fn distance(&self, point: &Vector3<f64>) -> f64 {
        let local = self.rotation.inverse() * (point - self.center);
        let q = local.abs() - self.size * 0.5;
        let outside = q.map(|c| c.max(0.0)).norm();
        let inside = q.x.max(q.y).max(q.z).min(0.0);
        outside + inside
    }
}

/// Capsule: a segment swept by a radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapsuleSdf {
    pub start: Vector3<f64>,
    pub end: Vector3<f64>,
    pub radius: f64,
}

impl CapsuleSdf {
    pub fn new(start: Vector3<f64>, end: Vector3<f64>, radius: f64) -> Self {
        Self { start, end, radius }
    }

    /// Closest point on the core segment to `point`.
    pub fn closest_on_segment(&self, point: &Vector3<f64>) -> Vector3<f64> {
        let pa = point - self.start;
        let ba = self.end - self.start;
        let len_sq = ba.norm_squared();
        if len_sq < f64::EPSILON {
            return self.start;
        }
        let h = (pa.dot(&ba) / len_sq).clamp(0.0, 1.0);
        self.start + ba * h
    }
}

impl SignedDistance for CapsuleSdf {
    fn distance(&self, point: &Vector3<f64>) -> f64 {
        (point - self.closest_on_segment(point)).norm() - self.radius
    }
}

/// Plane given by a point and a unit normal. Positive on the normal side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneSdf {
    pub point: Vector3<f64>,
    pub normal: Unit<Vector3<f64>>,
}

impl PlaneSdf {
    /// Creates a plane, normalizing `normal`.
    pub fn new(point: Vector3<f64>, normal: Vector3<f64>) -> Self {
        Self {
            point,
            normal: Unit::new_normalize(normal),
        }
    }
}

impl SignedDistance for PlaneSdf {
    fn distance(&self, point: &Vector3<f64>) -> f64 {
        (point - self.point).dot(&self.normal)
    }
}

// ============================================================================
// CONTROLLER SHAPE
// ============================================================================

/// Grip proxy of a hand-held controller, expressed in controller-local space.
///
/// Answers three independent queries for the Automatic finger solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerShape {
    /// Handle capsule
    pub grip: CapsuleSdf,

    /// Plane the thumb pad should rest on
    pub thumb_plane: PlaneSdf,

    /// Plane separating thumb space (positive side) from finger space
    pub separator: PlaneSdf,

    /// Radius of a finger joint, subtracted from the grip distance (default: 0.005)
    pub finger_radius: f64,
}

impl ControllerShape {
    /// Capsule distance from a world point to the grip, minus the finger radius.
    pub fn grip_distance(&self, pose: &TrackedPose, point: &Vector3<f64>) -> f64 {
        let local = pose.inverse_transform_point(point);
        self.grip.distance(&local) - self.finger_radius
    }

    /// Unsigned distance from a world point to the thumb plane.
    pub fn thumb_plane_distance(&self, pose: &TrackedPose, point: &Vector3<f64>) -> f64 {
        let local = pose.inverse_transform_point(point);
        self.thumb_plane.distance(&local).abs()
    }

    /// Signed distance to the separator. Positive means inside thumb space.
    pub fn separator_distance(&self, pose: &TrackedPose, point: &Vector3<f64>) -> f64 {
        let local = pose.inverse_transform_point(point);
        self.separator.distance(&local)
    }
}

impl Default for ControllerShape {
    /// A generic wand-style controller held with the tracking origin above
    /// the fist: the handle runs down and back from the origin.
    fn default() -> Self {
        Self {
            grip: CapsuleSdf::new(
                Vector3::new(0.0, -0.015, -0.03),
                Vector3::new(0.0, -0.10, -0.075),
                0.02,
            ),
            thumb_plane: PlaneSdf::new(Vector3::new(0.0, 0.005, 0.0), Vector3::y()),
            separator: PlaneSdf::new(Vector3::new(0.0, -0.01, 0.0), Vector3::y()),
            finger_radius: 0.005,
        }
    }
}

// ============================================================================
// SCENE QUERY
// ============================================================================

/// Spatial query returning the shape in contact range of a point.
pub trait SdfScene {
    /// Returns the closest shape whose surface is within `radius` of `point`.
    fn overlap(&self, point: &Vector3<f64>, radius: f64) -> Option<&dyn SignedDistance>;
}

/// Flat list of grabbable shapes.
#[derive(Default)]
pub struct SdfWorld {
    shapes: Vec<Box<dyn SignedDistance>>,
}

impl SdfWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a shape and returns its index.
    pub fn add(&mut self, shape: impl SignedDistance + 'static) -> usize {
        self.shapes.push(Box::new(shape));
        self.shapes.len() - 1
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

impl SdfScene for SdfWorld {
    fn overlap(&self, point: &Vector3<f64>, radius: f64) -> Option<&dyn SignedDistance> {
        self.shapes
            .iter()
            .map(|s| (s.distance(point), s))
            .filter(|(d, _)| *d <= radius)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, s)| s.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_4;

    #[test]
    fn test_sphere_distance() {
        let s = SphereSdf::new(Vector3::new(0.0, 1.0, 0.0), 0.5);
        assert_relative_eq!(s.distance(&Vector3::new(0.0, 2.0, 0.0)), 0.5);
        assert_relative_eq!(s.distance(&Vector3::new(0.0, 1.0, 0.0)), -0.5);
    }

    #[test]
    fn test_box_distance_inside_and_outside() {
        let b = BoxSdf::aligned(Vector3::zeros(), Vector3::new(2.0, 2.0, 2.0));
        assert_relative_eq!(b.distance(&Vector3::new(3.0, 0.0, 0.0)), 2.0);
        assert_relative_eq!(b.distance(&Vector3::new(0.5, 0.0, 0.0)), -0.5);
        // Corner region measures to the corner
        assert_relative_eq!(
            b.distance(&Vector3::new(2.0, 2.0, 1.0)),
            2f64.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_rotated_box() {
        let b = BoxSdf::new(
            Vector3::zeros(),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_4),
            Vector3::new(2.0, 2.0, 2.0),
        );
        // The rotated corner now sits on +X at sqrt(2)
        assert_relative_eq!(
            b.distance(&Vector3::new(2.0, 0.0, 0.0)),
            2.0 - 2f64.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_capsule_distance_clamps_to_caps() {
        let c = CapsuleSdf::new(Vector3::zeros(), Vector3::new(0.0, 1.0, 0.0), 0.1);
        assert_relative_eq!(c.distance(&Vector3::new(0.5, 0.5, 0.0)), 0.4);
        assert_relative_eq!(c.distance(&Vector3::new(0.0, 2.0, 0.0)), 0.9);
        assert_relative_eq!(c.distance(&Vector3::new(0.0, -1.0, 0.0)), 0.9);
    }

    #[test]
    fn test_degenerate_capsule_is_sphere() {
        let c = CapsuleSdf::new(Vector3::zeros(), Vector3::zeros(), 0.25);
        assert_relative_eq!(c.distance(&Vector3::new(1.0, 0.0, 0.0)), 0.75);
    }

    #[test]
    fn test_plane_signed() {
        let p = PlaneSdf::new(Vector3::zeros(), Vector3::new(0.0, 2.0, 0.0));
        assert_relative_eq!(p.distance(&Vector3::new(3.0, 0.2, 1.0)), 0.2);
        assert_relative_eq!(p.distance(&Vector3::new(3.0, -0.2, 1.0)), -0.2);
    }

    #[test]
    fn test_controller_queries_follow_pose() {
        let shape = ControllerShape::default();
        let pose = TrackedPose::at(Vector3::new(1.0, 1.0, 1.0));

        // A point on the capsule core is inside by radius + finger radius
        let core = pose.transform_point(&shape.grip.start);
        assert_relative_eq!(shape.grip_distance(&pose, &core), -0.025, epsilon = 1e-12);

        let above = pose.transform_point(&Vector3::new(0.0, 0.105, 0.0));
        assert_relative_eq!(shape.thumb_plane_distance(&pose, &above), 0.1, epsilon = 1e-12);
        assert!(shape.separator_distance(&pose, &above) > 0.0);
    }

    #[test]
    fn test_world_overlap_picks_closest_in_range() {
        let mut world = SdfWorld::new();
        world.add(SphereSdf::new(Vector3::new(0.0, 0.0, 0.0), 0.1));
        world.add(SphereSdf::new(Vector3::new(0.0, 0.3, 0.0), 0.1));

        let p = Vector3::new(0.0, 0.103, 0.0);
        let hit = world.overlap(&p, 0.005).unwrap();
        assert_relative_eq!(hit.distance(&p), 0.003, epsilon = 1e-12);

        assert!(world.overlap(&Vector3::new(5.0, 0.0, 0.0), 0.005).is_none());
    }
}
