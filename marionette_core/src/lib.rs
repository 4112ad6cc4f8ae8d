//! Marionette Core - six-point full-body avatar calibration and IK.
//!
//! This library turns six sparse tracker poses (head, two hands, pelvis,
//! two feet) into a fully posed humanoid:
//! 1. **Device identification**: a T-pose plane fit assigns raw devices to roles
//! 2. **Calibration pipeline**: staged, confirm-gated measurement of the body
//!    into a profile of proportions and anchor joints
//! 3. **IK engine**: per-frame mapping of anchors onto the skeleton, with arm
//!    stretch and gradient-descent finger bending against signed distances

pub mod avatar_runtime;
pub mod body_profile;
pub mod config;
pub mod controller_style;
pub mod driver;
pub mod identification;
pub mod marionette_calibration;
pub mod marionette_fingers;
pub mod marionette_ik;
pub mod math;
pub mod messages;
pub mod replication;
pub mod rig;
pub mod sampler;
pub mod sdf;
pub mod skeleton;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use avatar_runtime::{AvatarFactory, AvatarKind, AvatarRuntime, TickReport};
pub use body_profile::{AnchorJoint, AnchorKind, AnchorSet, BodyMeasures, BodyProfile, RootSteps};
pub use config::{AvatarProperties, CalibrationConfig, ConfigError, FingerSolverConfig, RuntimeConfig};
pub use controller_style::{ControllerStyle, FingerPolicy, StylePolicy};
pub use driver::{AvatarDriver, HardwareDriver, PoseSource, RoleMap, SimulatedDriver};
pub use identification::{IdentificationConfig, IdentifyError};
pub use marionette_calibration::{CalibrationError, CalibrationEvent, CalibrationPipeline, CalibrationStage};
pub use marionette_fingers::FingerSolver;
pub use marionette_ik::{IkEngine, IkFrame, IkFrameOutcome, IkPhase};
pub use messages::{Prompt, PromptKind};
pub use replication::{CalibrationPacket, FinishedGate, TrackerPacket};
pub use rig::{RigSkeleton, RigTemplate};
pub use sampler::PoseSampler;
pub use sdf::{ControllerShape, SdfScene, SdfWorld, SignedDistance};
pub use skeleton::{HumanBone, HumanoidSkeleton, Side};
