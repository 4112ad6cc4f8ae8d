//! Ground ray-cast abstraction used to snap spawned avatars to the floor.

use nalgebra::Vector3;

/// Scene query answering "where does this ray hit the ground".
pub trait FloorProbe {
    /// Casts a ray and returns the first hit point within `max_distance`.
    ///
    /// # Arguments
    /// * `origin` - Ray start in world space
    /// * `direction` - Unit ray direction
    /// * `max_distance` - Maximum travel along the ray in meters
    fn raycast(
        &self,
        origin: &Vector3<f64>,
        direction: &Vector3<f64>,
        max_distance: f64,
    ) -> Option<Vector3<f64>>;
}

/// An infinite horizontal floor at a fixed height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatFloor {
    /// Floor height on the Y axis (default: 0.0)
    pub height: f64,
}

impl FlatFloor {
    /// Creates a floor at `height`.
    pub fn new(height: f64) -> Self {
        Self { height }
    }
}

impl Default for FlatFloor {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl FloorProbe for FlatFloor {
    fn raycast(
        &self,
        origin: &Vector3<f64>,
        direction: &Vector3<f64>,
        max_distance: f64,
    ) -> Option<Vector3<f64>> {
        if direction.y.abs() < f64::EPSILON {
            return None;
        }
        let t = (self.height - origin.y) / direction.y;
        if !(0.0..=max_distance).contains(&t) {
            return None;
        }
        Some(origin + direction * t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_flat_floor_down_hit() {
        let floor = FlatFloor::new(0.0);
        let hit = floor
            .raycast(&Vector3::new(1.0, 0.3, 2.0), &-Vector3::y(), 0.5)
            .unwrap();
        assert_relative_eq!(hit, Vector3::new(1.0, 0.0, 2.0), epsilon = 1e-12);
    }

    #[test]
    fn test_flat_floor_out_of_range() {
        let floor = FlatFloor::new(0.0);
        assert!(floor.raycast(&Vector3::new(0.0, 0.8, 0.0), &-Vector3::y(), 0.5).is_none());
        // Wrong direction
        assert!(floor.raycast(&Vector3::new(0.0, 0.3, 0.0), &Vector3::y(), 0.5).is_none());
    }

    #[test]
    fn test_flat_floor_upward_fallback() {
        let floor = FlatFloor::new(0.1);
        let hit = floor
            .raycast(&Vector3::new(0.0, -0.2, 0.0), &Vector3::y(), 0.5)
            .unwrap();
        assert_relative_eq!(hit.y, 0.1, epsilon = 1e-12);
    }
}
