//! Rotation helpers shared by the engines.

use nalgebra::{Rotation3, Unit, UnitQuaternion, Vector3};

/// Builds a rotation from Euler angles in degrees, applied Z first, then X,
/// then Y (q = Ry * Rx * Rz).
pub fn euler_degrees(x: f64, y: f64, z: f64) -> UnitQuaternion<f64> {
    let rx = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), x.to_radians());
    let ry = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), y.to_radians());
    let rz = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), z.to_radians());
    ry * rx * rz
}

/// Same as [`euler_degrees`] taking a vector of angles.
pub fn euler_degrees_v(angles: &Vector3<f64>) -> UnitQuaternion<f64> {
    euler_degrees(angles.x, angles.y, angles.z)
}

/// Spherical interpolation that extrapolates for `t` outside [0, 1].
pub fn slerp_unclamped(
    from: &UnitQuaternion<f64>,
    to: &UnitQuaternion<f64>,
    t: f64,
) -> UnitQuaternion<f64> {
    let mut delta = from.inverse() * to;
    // Shortest arc
    if delta.w < 0.0 {
        delta = UnitQuaternion::new_unchecked(-delta.into_inner());
    }
    from * delta.powf(t)
}

/// Minimal rotation taking direction `from` onto direction `to`.
///
/// Opposite directions rotate half a turn about an arbitrary perpendicular.
pub fn from_to_rotation(from: &Vector3<f64>, to: &Vector3<f64>) -> UnitQuaternion<f64> {
    if let Some(q) = UnitQuaternion::rotation_between(from, to) {
        return q;
    }
    if from.norm() < f64::EPSILON || to.norm() < f64::EPSILON {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::from_axis_angle(&any_perpendicular(from), std::f64::consts::PI)
}

/// Returns a unit vector perpendicular to `v`.
pub fn any_perpendicular(v: &Vector3<f64>) -> Unit<Vector3<f64>> {
    let candidate = if v.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
    Unit::new_normalize(v.cross(&candidate))
}

/// Rotation whose local +Y points along `direction` and whose local +Z leans
/// toward `toward`. Positive rotation about local +X then swings +Y toward `toward`.
pub fn frame_along(direction: &Vector3<f64>, toward: &Vector3<f64>) -> UnitQuaternion<f64> {
    let y = direction.normalize();
    let mut z = toward - y * toward.dot(&y);
    if z.norm() < 1e-9 {
        z = any_perpendicular(&y).into_inner();
    }
    let z = z.normalize();
    let x = y.cross(&z);
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_basis_unchecked(&[x, y, z]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_euler_single_axis() {
        let q = euler_degrees(90.0, 0.0, 0.0);
        assert_relative_eq!(q * Vector3::y(), Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn test_euler_order_zxy() {
        let q = euler_degrees(30.0, 40.0, 50.0);
        let expected = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 40f64.to_radians())
            * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 30f64.to_radians())
            * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 50f64.to_radians());
        assert_relative_eq!(q, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_slerp_unclamped_extrapolates() {
        let open = UnitQuaternion::identity();
        let closed = euler_degrees(100.0, 0.0, 0.0);
        let half = slerp_unclamped(&open, &closed, 0.5);
        assert_relative_eq!(half.angle(), 50f64.to_radians(), epsilon = 1e-9);
        let back = slerp_unclamped(&open, &closed, -0.5);
        assert_relative_eq!(back, euler_degrees(-50.0, 0.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_from_to_rotation_opposite() {
        let q = from_to_rotation(&Vector3::y(), &-Vector3::y());
        assert_relative_eq!(q * Vector3::y(), -Vector3::y(), epsilon = 1e-12);
    }

    #[test]
    fn test_frame_along_curls_toward() {
        let q = frame_along(&Vector3::x(), &-Vector3::y());
        assert_relative_eq!(q * Vector3::y(), Vector3::x(), epsilon = 1e-12);
        assert_relative_eq!(q * Vector3::z(), -Vector3::y(), epsilon = 1e-12);
        // Quarter curl about local X swings the finger down
        let curled = q * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::FRAC_PI_2);
        assert_relative_eq!(curled * Vector3::y(), -Vector3::y(), epsilon = 1e-12);
    }
}
