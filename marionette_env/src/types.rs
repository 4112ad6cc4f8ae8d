//! Common types for the Marionette environment abstraction.
//!
//! Coordinate convention: +Y up, +Z forward, +X right.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Index of a tracked device as reported by the device layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// Hardware class of a tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    /// Head-mounted display
    Headset,
    /// Hand-held controller
    Controller,
    /// Strap-on body tracker
    Tracker,
    /// Base stations and anything else the device layer reports
    Other,
}

/// The six semantic body roles driven by tracked devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceRole {
    Head,
    HandLeft,
    HandRight,
    Pelvis,
    FootLeft,
    FootRight,
}

impl DeviceRole {
    /// All roles in canonical order.
    pub const ALL: [DeviceRole; 6] = [
        DeviceRole::Head,
        DeviceRole::HandLeft,
        DeviceRole::HandRight,
        DeviceRole::Pelvis,
        DeviceRole::FootLeft,
        DeviceRole::FootRight,
    ];

    /// Returns the role name.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceRole::Head => "head",
            DeviceRole::HandLeft => "hand_left",
            DeviceRole::HandRight => "hand_right",
            DeviceRole::Pelvis => "pelvis",
            DeviceRole::FootLeft => "foot_left",
            DeviceRole::FootRight => "foot_right",
        }
    }
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A rigid world pose: position plus orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedPose {
    /// World position in meters
    pub position: Vector3<f64>,

    /// World orientation
    pub rotation: UnitQuaternion<f64>,
}

impl TrackedPose {
    /// Creates a pose from position and rotation.
    pub fn new(position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self { position, rotation }
    }

    /// Creates an unrotated pose at `position`.
    pub fn at(position: Vector3<f64>) -> Self {
        Self::new(position, UnitQuaternion::identity())
    }

    /// Local +Z expressed in world space.
    pub fn forward(&self) -> Vector3<f64> {
        self.rotation * Vector3::z()
    }

    /// Local +X expressed in world space.
    pub fn right(&self) -> Vector3<f64> {
        self.rotation * Vector3::x()
    }

    /// Local +Y expressed in world space.
    pub fn up(&self) -> Vector3<f64> {
        self.rotation * Vector3::y()
    }

    /// Maps a point from this pose's local frame to world space.
    pub fn transform_point(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.position + self.rotation * local
    }

    /// Maps a world point into this pose's local frame.
    pub fn inverse_transform_point(&self, world: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse() * (world - self.position)
    }

    /// Maps a world direction into this pose's local frame.
    pub fn inverse_transform_vector(&self, world: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse() * world
    }

    /// Composes a child pose expressed in this pose's local frame.
    pub fn compose(&self, local: &TrackedPose) -> TrackedPose {
        TrackedPose {
            position: self.transform_point(&local.position),
            rotation: self.rotation * local.rotation,
        }
    }
}

impl Default for TrackedPose {
    fn default() -> Self {
        Self::at(Vector3::zeros())
    }
}

/// One device entry of a frame snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedDevice {
    pub id: DeviceId,
    pub class: DeviceClass,
    pub pose: TrackedPose,
    /// False while the device is off or has lost tracking
    pub active: bool,
}

impl TrackedDevice {
    /// Creates an active device.
    pub fn new(id: DeviceId, class: DeviceClass, pose: TrackedPose) -> Self {
        Self {
            id,
            class,
            pose,
            active: true,
        }
    }
}

/// Snapshot of every device the host reports for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceFrame {
    /// Host frame number the snapshot was taken at
    pub frame: u64,

    /// Devices in device-layer order
    pub devices: Vec<TrackedDevice>,
}

impl DeviceFrame {
    /// Creates a frame from a device list.
    pub fn new(frame: u64, devices: Vec<TrackedDevice>) -> Self {
        Self { frame, devices }
    }

    /// Looks up a device by id.
    pub fn get(&self, id: DeviceId) -> Option<&TrackedDevice> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Returns the pose of `id` if the device is present and active.
    pub fn active_pose(&self, id: DeviceId) -> Option<TrackedPose> {
        self.get(id).filter(|d| d.active).map(|d| d.pose)
    }

    /// Iterates over active devices of one class.
    pub fn active_of(&self, class: DeviceClass) -> impl Iterator<Item = &TrackedDevice> {
        self.devices
            .iter()
            .filter(move |d| d.active && d.class == class)
    }

    /// Counts active devices of one class.
    pub fn count(&self, class: DeviceClass) -> usize {
        self.active_of(class).count()
    }

    /// Returns the first active headset.
    pub fn headset(&self) -> Option<&TrackedDevice> {
        self.active_of(DeviceClass::Headset).next()
    }
}
