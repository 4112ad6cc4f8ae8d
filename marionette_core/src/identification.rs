//! Device Identification - assigns raw devices to body roles.
//!
//! With the user standing in a T-pose, every tracked point lies close to one
//! vertical body plane. We fit that plane, orient it with the headset's
//! forward vector, and read each device's role from its 2D position on the
//! plane relative to the head:
//!
//! ```text
//!        v (up)
//!        │   head (origin)
//!   L ───┼─── R   controllers: u < 0 -> left hand, else right hand
//!        │        trackers:    |v| < waist -> pelvis
//!      pelvis                  else u < 0 -> left foot, else right foot
//!    L      R
//! ```

use crate::driver::RoleMap;
use marionette_env::{DeviceId, DeviceRole, TrackedPose};
use nalgebra::{Unit, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for device identification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentificationConfig {
    /// Minimum |cos| between plane normal and head forward (default: 0.5)
    pub head_alignment_threshold: f64,

    /// Trackers closer than this to the head on the vertical axis are the pelvis (default: 0.8 m)
    pub max_head_to_waist: f64,

    /// Required controller-class devices (default: 2)
    pub min_controllers: usize,

    /// Required tracker-class devices (default: 3)
    pub min_trackers: usize,

    /// Devices considered per frame (default: 16)
    pub max_devices: usize,
}

impl Default for IdentificationConfig {
    fn default() -> Self {
        Self {
            head_alignment_threshold: 0.5,
            max_head_to_waist: 0.8,
            min_controllers: 2,
            min_trackers: 3,
            max_devices: 16,
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Reasons identification can fail. All of them are retryable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IdentifyError {
    #[error("Not enough devices: {controllers} controller(s), {trackers} tracker(s)")]
    InsufficientDevices { controllers: usize, trackers: usize },

    #[error("No active headset")]
    NoHeadset,

    #[error("Plane fit needs at least 3 points, got {0}")]
    TooFewPoints(usize),

    #[error("Plane fit is degenerate")]
    DegeneratePlane,

    #[error("Head not aligned with body plane (cos = {deviation:.3})")]
    HeadMisaligned { deviation: f64 },

    #[error("No device could be assigned to {0}")]
    Unidentified(DeviceRole),
}

impl IdentifyError {
    /// Failure code used for prompt lookup.
    ///
    /// 0 = not enough devices, 1 = could not identify, 2 = head misaligned.
    pub fn code(&self) -> u8 {
        match self {
            IdentifyError::InsufficientDevices { .. } | IdentifyError::NoHeadset => 0,
            IdentifyError::TooFewPoints(_)
            | IdentifyError::DegeneratePlane
            | IdentifyError::Unidentified(_) => 1,
            IdentifyError::HeadMisaligned { .. } => 2,
        }
    }
}

// ============================================================================
// PLANE FIT
// ============================================================================

/// A best-fit plane through a point cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedPlane {
    /// Unit normal
    pub normal: Unit<Vector3<f64>>,

    /// A point on the plane (the input centroid)
    pub point: Vector3<f64>,
}

impl FittedPlane {
    /// Orthogonal projection of `p` onto the plane.
    pub fn project(&self, p: &Vector3<f64>) -> Vector3<f64> {
        p - self.normal.into_inner() * (p - self.point).dot(&self.normal)
    }

    /// Returns the same plane with the normal flipped.
    pub fn flipped(&self) -> Self {
        Self {
            normal: -self.normal,
            point: self.point,
        }
    }
}

/// Least-squares plane through `points`, regressing depth (z) on x and y.
///
/// Uses the centered second moments; a singular x/y moment matrix means the
/// points do not span the plane and is reported instead of guessed.
pub fn fit_plane(points: &[Vector3<f64>]) -> Result<FittedPlane, IdentifyError> {
    if points.len() < 3 {
        return Err(IdentifyError::TooFewPoints(points.len()));
    }

    let n = points.len() as f64;
    let mean = points.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;

    let (mut xx, mut xy, mut xz, mut yy, mut yz) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for p in points {
        let r = p - mean;
        xx += r.x * r.x;
        xy += r.x * r.y;
        xz += r.x * r.z;
        yy += r.y * r.y;
        yz += r.y * r.z;
    }

    let det = xx * yy - xy * xy;
    if det.abs() < 1e-12 * (xx * yy).max(1.0) {
        return Err(IdentifyError::DegeneratePlane);
    }

    let a = (yy * xz - xy * yz) / det;
    let b = (xx * yz - xy * xz) / det;

    Ok(FittedPlane {
        normal: Unit::new_normalize(Vector3::new(a, b, -1.0)),
        point: mean,
    })
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// A device position offered to identification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: DeviceId,
    pub position: Vector3<f64>,
}

impl Candidate {
    pub fn new(id: DeviceId, position: Vector3<f64>) -> Self {
        Self { id, position }
    }
}

/// Plane coordinates of a candidate relative to the head projection.
#[derive(Debug, Clone, Copy)]
struct PlanarPoint {
    id: DeviceId,
    u: f64,
    v: f64,
}

/// Assigns controllers and trackers to the five body roles.
///
/// When several devices qualify for one role, the most extreme one wins
/// (largest |u| for hands and feet, smallest |v| for the pelvis), with the
/// device id as tie-break, so the result never depends on input order.
///
/// # Arguments
/// * `head_id` - Headset device id (assigned to `DeviceRole::Head`)
/// * `head` - Headset pose; its forward vector orients the plane
/// * `controllers` - Controller-class candidates
/// * `trackers` - Tracker-class candidates
pub fn identify_devices(
    head_id: DeviceId,
    head: &TrackedPose,
    controllers: &[Candidate],
    trackers: &[Candidate],
    config: &IdentificationConfig,
) -> Result<RoleMap, IdentifyError> {
    if controllers.len() < config.min_controllers || trackers.len() < config.min_trackers {
        return Err(IdentifyError::InsufficientDevices {
            controllers: controllers.len(),
            trackers: trackers.len(),
        });
    }

    let points: Vec<Vector3<f64>> = std::iter::once(head.position)
        .chain(controllers.iter().map(|c| c.position))
        .chain(trackers.iter().map(|c| c.position))
        .collect();

    let mut plane = fit_plane(&points)?;

    let deviation = plane.normal.dot(&head.forward());
    if deviation.abs() < config.head_alignment_threshold {
        return Err(IdentifyError::HeadMisaligned { deviation });
    }
    if deviation < 0.0 {
        plane = plane.flipped();
    }

    let v_axis = Vector3::y();
    let u_axis = v_axis.cross(&plane.normal);
    let origin = plane.project(&head.position);

    let planar = |c: &Candidate| {
        let rel = plane.project(&c.position) - origin;
        PlanarPoint {
            id: c.id,
            u: rel.dot(&u_axis),
            v: rel.dot(&v_axis),
        }
    };

    let hands: Vec<PlanarPoint> = controllers.iter().map(planar).collect();
    let feet_and_pelvis: Vec<PlanarPoint> = trackers.iter().map(planar).collect();

    let hand_left = pick(hands.iter().filter(|p| p.u < 0.0), |p| -p.u)
        .ok_or(IdentifyError::Unidentified(DeviceRole::HandLeft))?;
    let hand_right = pick(hands.iter().filter(|p| p.u >= 0.0), |p| p.u)
        .ok_or(IdentifyError::Unidentified(DeviceRole::HandRight))?;

    let waist = config.max_head_to_waist;
    let pelvis = pick(feet_and_pelvis.iter().filter(|p| p.v.abs() < waist), |p| -p.v.abs())
        .ok_or(IdentifyError::Unidentified(DeviceRole::Pelvis))?;
    let foot_left = pick(
        feet_and_pelvis.iter().filter(|p| p.v.abs() >= waist && p.u < 0.0),
        |p| -p.u,
    )
    .ok_or(IdentifyError::Unidentified(DeviceRole::FootLeft))?;
    let foot_right = pick(
        feet_and_pelvis.iter().filter(|p| p.v.abs() >= waist && p.u >= 0.0),
        |p| p.u,
    )
    .ok_or(IdentifyError::Unidentified(DeviceRole::FootRight))?;

    Ok(RoleMap::new()
        .with(DeviceRole::Head, head_id)
        .with(DeviceRole::HandLeft, hand_left)
        .with(DeviceRole::HandRight, hand_right)
        .with(DeviceRole::Pelvis, pelvis)
        .with(DeviceRole::FootLeft, foot_left)
        .with(DeviceRole::FootRight, foot_right))
}

/// Highest-scoring point, ties broken by smallest id.
fn pick<'a>(
    points: impl Iterator<Item = &'a PlanarPoint>,
    score: impl Fn(&PlanarPoint) -> f64,
) -> Option<DeviceId> {
    points
        .max_by(|a, b| {
            score(a)
                .total_cmp(&score(b))
                .then_with(|| b.id.cmp(&a.id))
        })
        .map(|p| p.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;
    use proptest::prelude::*;

    fn canonical() -> (TrackedPose, Vec<Candidate>, Vec<Candidate>) {
        let head = TrackedPose::at(Vector3::new(0.0, 1.7, 0.0));
        let controllers = vec![
            Candidate::new(DeviceId(1), Vector3::new(-0.6, 1.4, 0.0)),
            Candidate::new(DeviceId(2), Vector3::new(0.6, 1.4, 0.0)),
        ];
        let trackers = vec![
            Candidate::new(DeviceId(3), Vector3::new(0.0, 1.0, 0.0)),
            Candidate::new(DeviceId(4), Vector3::new(-0.1, 0.0, 0.0)),
            Candidate::new(DeviceId(5), Vector3::new(0.1, 0.0, 0.0)),
        ];
        (head, controllers, trackers)
    }

    #[test]
    fn test_fit_plane_recovers_tilted_plane() {
        // z = 0.2 x - 0.1 y + 0.5
        let pts: Vec<Vector3<f64>> = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 2.0), (-1.0, 0.5)]
            .iter()
            .map(|&(x, y)| Vector3::new(x, y, 0.2 * x - 0.1 * y + 0.5))
            .collect();
        let plane = fit_plane(&pts).unwrap();
        let expected = Vector3::new(0.2, -0.1, -1.0).normalize();
        assert_relative_eq!(plane.normal.into_inner(), expected, epsilon = 1e-9);
        for p in &pts {
            assert_relative_eq!(plane.project(p), *p, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_fit_plane_rejects_degenerate() {
        // All points on a vertical line: x/y moments are singular
        let pts = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 2.0, 0.0),
        ];
        assert_eq!(fit_plane(&pts), Err(IdentifyError::DegeneratePlane));
        assert_eq!(fit_plane(&pts[..2]), Err(IdentifyError::TooFewPoints(2)));
    }

    #[test]
    fn test_identify_canonical_tpose() {
        let (head, controllers, trackers) = canonical();
        let roles = identify_devices(
            DeviceId(0),
            &head,
            &controllers,
            &trackers,
            &IdentificationConfig::default(),
        )
        .unwrap();

        assert_eq!(roles.get(DeviceRole::Head), Some(DeviceId(0)));
        assert_eq!(roles.get(DeviceRole::HandLeft), Some(DeviceId(1)));
        assert_eq!(roles.get(DeviceRole::HandRight), Some(DeviceId(2)));
        assert_eq!(roles.get(DeviceRole::Pelvis), Some(DeviceId(3)));
        assert_eq!(roles.get(DeviceRole::FootLeft), Some(DeviceId(4)));
        assert_eq!(roles.get(DeviceRole::FootRight), Some(DeviceId(5)));
    }

    #[test]
    fn test_identify_insufficient_devices() {
        let (head, controllers, trackers) = canonical();
        let err = identify_devices(
            DeviceId(0),
            &head,
            &controllers[..1],
            &trackers,
            &IdentificationConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, IdentifyError::InsufficientDevices { controllers: 1, trackers: 3 });
        assert_eq!(err.code(), 0);
    }

    #[test]
    fn test_identify_head_misaligned() {
        let (mut head, controllers, trackers) = canonical();
        // Looking sideways, along the body plane
        head.rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 80f64.to_radians());
        let err = identify_devices(
            DeviceId(0),
            &head,
            &controllers,
            &trackers,
            &IdentificationConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IdentifyError::HeadMisaligned { .. }));
        assert_eq!(err.code(), 2);
    }

    #[test]
    fn test_identify_facing_backwards_mirrors_sides() {
        let (mut head, controllers, trackers) = canonical();
        head.rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f64::consts::PI);
        let roles = identify_devices(
            DeviceId(0),
            &head,
            &controllers,
            &trackers,
            &IdentificationConfig::default(),
        )
        .unwrap();
        // Facing -Z, the device at -X is on the user's right
        assert_eq!(roles.get(DeviceRole::HandRight), Some(DeviceId(1)));
        assert_eq!(roles.get(DeviceRole::FootLeft), Some(DeviceId(5)));
    }

    #[test]
    fn test_identify_missing_pelvis() {
        let (head, controllers, mut trackers) = canonical();
        trackers[0].position = Vector3::new(0.3, 0.1, 0.0);
        let err = identify_devices(
            DeviceId(0),
            &head,
            &controllers,
            &trackers,
            &IdentificationConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, IdentifyError::Unidentified(DeviceRole::Pelvis));
        assert_eq!(err.code(), 1);
    }

    proptest! {
        #[test]
        fn test_identification_order_independent(
            order_c in Just(vec![0usize, 1]).prop_shuffle(),
            order_t in Just(vec![0usize, 1, 2]).prop_shuffle(),
            yaw in -0.6f64..0.6,
            hand_span in 0.3f64..0.9,
            hand_height in 1.1f64..1.6,
            pelvis_height in 0.95f64..1.15,
            stance in 0.05f64..0.3,
        ) {
            // Body plane rotated about the vertical by `yaw`, head facing its normal
            let rot = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw);
            let place = |x: f64, y: f64| rot * Vector3::new(x, y, 0.0);

            let head = TrackedPose::new(place(0.0, 1.7), rot);
            let controllers = [
                Candidate::new(DeviceId(10), place(-hand_span, hand_height)),
                Candidate::new(DeviceId(11), place(hand_span, hand_height)),
            ];
            let trackers = [
                Candidate::new(DeviceId(20), place(0.0, pelvis_height)),
                Candidate::new(DeviceId(21), place(-stance, 0.0)),
                Candidate::new(DeviceId(22), place(stance, 0.0)),
            ];

            let shuffled_c: Vec<Candidate> = order_c.iter().map(|&i| controllers[i]).collect();
            let shuffled_t: Vec<Candidate> = order_t.iter().map(|&i| trackers[i]).collect();

            let roles = identify_devices(
                DeviceId(0), &head, &shuffled_c, &shuffled_t, &IdentificationConfig::default(),
            ).unwrap();

            prop_assert_eq!(roles.get(DeviceRole::HandLeft), Some(DeviceId(10)));
            prop_assert_eq!(roles.get(DeviceRole::HandRight), Some(DeviceId(11)));
            prop_assert_eq!(roles.get(DeviceRole::Pelvis), Some(DeviceId(20)));
            prop_assert_eq!(roles.get(DeviceRole::FootLeft), Some(DeviceId(21)));
            prop_assert_eq!(roles.get(DeviceRole::FootRight), Some(DeviceId(22)));
        }
    }
}
