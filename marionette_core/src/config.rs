//! Tunables for calibration, solving and the avatar model.
//!
//! Every struct deserializes from a partial JSON document: missing keys keep
//! their defaults.

use crate::controller_style::ControllerStyle;
use crate::identification::IdentificationConfig;
use crate::sdf::ControllerShape;
use crate::skeleton::Side;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ============================================================================
// CALIBRATION
// ============================================================================

/// Timing and geometry of the staged calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Confirm input is ignored for this long after a stage starts (default: 1.0 s)
    pub debounce_secs: f64,

    /// Ticks to wait after spawning the mannequin before the ground snap (default: 2)
    pub ground_settle_frames: u64,

    /// Length of each floor ray (default: 0.5 m)
    pub ground_ray_length: f64,

    /// Wrist anchor distance behind the hand controller (default: 0.1 m)
    pub wrist_back_offset: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            debounce_secs: 1.0,
            ground_settle_frames: 2,
            ground_ray_length: 0.5,
            wrist_back_offset: 0.1,
        }
    }
}

impl CalibrationConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs_f64(self.debounce_secs.max(0.0))
    }
}

// ============================================================================
// FINGERS
// ============================================================================

/// Finger descent parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerSolverConfig {
    /// Finite-difference step on the blend parameter (default: 0.02)
    pub sampling_distance: f64,

    /// Step size against the controller grip (default: 0.1)
    pub learning_rate: f64,

    /// Step size against grabbed objects (default: 0.005)
    pub objects_learning_rate: f64,

    /// Thumb step multiplier against grabbed objects (default: 20)
    pub thumb_objects_multiplier: f64,

    /// A chain stops descending below this score (default: 0.001)
    pub early_stop: f64,

    /// Thumb twist only moves when the pad is farther than this from its plane (default: 0.001)
    pub thumb_twist_threshold: f64,

    /// Twist at parameter 1, degrees (default: 10)
    pub max_thumb_twist_deg: f64,

    /// Blend used by the uniform mode (default: 0.1)
    pub uniform_blend: f64,

    /// Curl of a closed non-thumb joint about its local X, degrees (default: 110)
    pub closed_curl_deg: f64,

    /// Roll of a closed thumb joint about its local Z, degrees (default: 10)
    pub thumb_closed_roll_deg: f64,

    /// Fingertip distance past the distal joint, as a fraction of the last segment (default: 0.65)
    pub last_joint_fraction: f64,

    /// Blend change per tick while nothing is held (default: 0.00125)
    pub relax_rate: f64,

    /// Contact radius of the palm overlap query (default: 0.005 m)
    pub overlap_radius: f64,

    /// Upper bound of non-thumb blends against objects (default: 0.75)
    pub objects_max_blend: f64,
}

impl Default for FingerSolverConfig {
    fn default() -> Self {
        Self {
            sampling_distance: 0.02,
            learning_rate: 0.1,
            objects_learning_rate: 0.005,
            thumb_objects_multiplier: 20.0,
            early_stop: 0.001,
            thumb_twist_threshold: 0.001,
            max_thumb_twist_deg: 10.0,
            uniform_blend: 0.1,
            closed_curl_deg: 110.0,
            thumb_closed_roll_deg: 10.0,
            last_joint_fraction: 0.65,
            relax_rate: 0.00125,
            overlap_radius: 0.005,
            objects_max_blend: 0.75,
        }
    }
}

// ============================================================================
// AVATAR
// ============================================================================

/// Per-avatar tuning of the hands and head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarProperties {
    /// Head center in avatar space (default: (0, 1.65, 0))
    pub head_center: Vector3<f64>,

    /// Head clipping radius (default: 0.2)
    pub head_radius: f64,

    /// Euler offset (degrees, ZXY) applied to an attached left hand
    pub left_hand_rotation: Vector3<f64>,

    /// Euler offset (degrees, ZXY) applied to an attached right hand
    pub right_hand_rotation: Vector3<f64>,

    /// Palm grab point in left hand space
    pub left_grab_position: Vector3<f64>,

    /// Palm grab point in right hand space
    pub right_grab_position: Vector3<f64>,

    /// Distance the clamped controller proxy sits behind the grab point (default: 0.1)
    pub controller_clamp_offset: f64,
}

impl Default for AvatarProperties {
    fn default() -> Self {
        Self {
            head_center: Vector3::new(0.0, 1.65, 0.0),
            head_radius: 0.2,
            left_hand_rotation: Vector3::new(-2.033, 79.846, 60.0),
            right_hand_rotation: Vector3::new(-0.467, -80.019, -60.0),
            left_grab_position: Vector3::new(0.005, 0.05, 0.03),
            right_grab_position: Vector3::new(-0.005, 0.05, 0.03),
            controller_clamp_offset: 0.1,
        }
    }
}

impl AvatarProperties {
    pub fn hand_rotation(&self, side: Side) -> Vector3<f64> {
        match side {
            Side::Left => self.left_hand_rotation,
            Side::Right => self.right_hand_rotation,
        }
    }

    pub fn grab_position(&self, side: Side) -> Vector3<f64> {
        match side {
            Side::Left => self.left_grab_position,
            Side::Right => self.right_grab_position,
        }
    }
}

// ============================================================================
// RUNTIME
// ============================================================================

/// Everything the runtime needs, loadable from one JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Hand/controller presentation (default: ClosedHandAttachedControllers)
    pub controller_style: ControllerStyle,

    /// Open-hand styles solve fingers against touched objects (default: false)
    pub objects_fingers: bool,

    /// Run IK on the mannequin while calibrating (default: false)
    pub ik_during_calibration: bool,

    pub identification: IdentificationConfig,
    pub calibration: CalibrationConfig,
    pub fingers: FingerSolverConfig,
    pub properties: AvatarProperties,
    pub controller_shape: ControllerShape,
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Rejects values the solvers cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("fingers.sampling_distance", self.fingers.sampling_distance),
            ("fingers.learning_rate", self.fingers.learning_rate),
            ("fingers.objects_learning_rate", self.fingers.objects_learning_rate),
            ("calibration.ground_ray_length", self.calibration.ground_ray_length),
        ];
        for (field, value) in positive {
            if !(value > 0.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be positive, got {value}"),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.fingers.uniform_blend) {
            return Err(ConfigError::Invalid {
                field: "fingers.uniform_blend",
                reason: format!("must be within [0, 1], got {}", self.fingers.uniform_blend),
            });
        }
        if self.identification.min_controllers < 2 || self.identification.min_trackers < 3 {
            return Err(ConfigError::Invalid {
                field: "identification",
                reason: "six roles need at least 2 controllers and 3 trackers".to_string(),
            });
        }
        Ok(())
    }
}
