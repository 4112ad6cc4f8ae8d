//! Calibration replication payloads.
//!
//! Only the serialized shape lives here. Sending packets between peers is
//! the host's business.

use crate::body_profile::{BodyMeasures, RootSteps};
use crate::controller_style::ControllerStyle;
use crate::driver::{PoseSource, RoleMap};
use marionette_env::{DeviceClass, DeviceFrame, DeviceId, DeviceRole, TrackedDevice, TrackedPose};
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("Payload encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Payload decoding failed: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Measures carry no root-step snapshots")]
    NoRootSteps,

    #[error("Role map has no device for {0}")]
    MissingRole(DeviceRole),
}

fn class_of(role: DeviceRole) -> DeviceClass {
    match role {
        DeviceRole::Head => DeviceClass::Headset,
        DeviceRole::HandLeft | DeviceRole::HandRight => DeviceClass::Controller,
        DeviceRole::Pelvis | DeviceRole::FootLeft | DeviceRole::FootRight => DeviceClass::Tracker,
    }
}

/// Role table used by observers that replay a remote calibration.
pub fn replay_roles() -> RoleMap {
    DeviceRole::ALL
        .iter()
        .enumerate()
        .fold(RoleMap::new(), |map, (i, role)| map.with(*role, DeviceId(i as u32)))
}

/// One-shot packet describing a finished calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPacket {
    pub avatar_id: Uuid,
    pub measures: BodyMeasures,
    pub style: ControllerStyle,
    pub avatar_name: String,
}

impl CalibrationPacket {
    /// Packet for a new avatar with a random id.
    pub fn new(measures: BodyMeasures, style: ControllerStyle, avatar_name: impl Into<String>) -> Self {
        Self {
            avatar_id: Uuid::new_v4(),
            measures,
            style,
            avatar_name: avatar_name.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ReplicationError> {
        serde_json::to_string(self).map_err(ReplicationError::Encode)
    }

    pub fn decode(json: &str) -> Result<Self, ReplicationError> {
        serde_json::from_str(json).map_err(ReplicationError::Decode)
    }

    /// Rebuilds the calibration-time device frame from the root steps.
    ///
    /// Feeding it to a simulated driver bound to `roles` replays the
    /// calibration instantly.
    pub fn root_step_frame(&self, roles: &RoleMap, frame: u64) -> Result<DeviceFrame, ReplicationError> {
        let steps = self.measures.root_steps.ok_or(ReplicationError::NoRootSteps)?;
        let devices = DeviceRole::ALL
            .into_iter()
            .map(|role| {
                let id = roles.get(role).ok_or(ReplicationError::MissingRole(role))?;
                Ok(TrackedDevice::new(id, class_of(role), steps.get(role)))
            })
            .collect::<Result<Vec<_>, ReplicationError>>()?;
        Ok(DeviceFrame::new(frame, devices))
    }
}

/// Live pose update for the six roles, in `DeviceRole::ALL` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerPacket {
    pub avatar_id: Uuid,
    pub poses: [(Vector3<f64>, UnitQuaternion<f64>); 6],
}

impl TrackerPacket {
    /// Snapshot of all six roles, or `None` if any is untracked.
    pub fn capture<S: PoseSource + ?Sized>(avatar_id: Uuid, source: &S) -> Option<Self> {
        let steps = RootSteps::capture(source)?;
        Some(Self {
            avatar_id,
            poses: DeviceRole::ALL.map(|role| {
                let pose = steps.get(role);
                (pose.position, pose.rotation)
            }),
        })
    }

    pub fn pose(&self, role: DeviceRole) -> TrackedPose {
        let i = DeviceRole::ALL.iter().position(|r| *r == role).unwrap_or(0);
        TrackedPose::new(self.poses[i].0, self.poses[i].1)
    }

    /// Device frame an observer's driver can consume.
    pub fn to_frame(&self, roles: &RoleMap, frame: u64) -> Result<DeviceFrame, ReplicationError> {
        let devices = DeviceRole::ALL
            .into_iter()
            .map(|role| {
                let id = roles.get(role).ok_or(ReplicationError::MissingRole(role))?;
                Ok(TrackedDevice::new(id, class_of(role), self.pose(role)))
            })
            .collect::<Result<Vec<_>, ReplicationError>>()?;
        Ok(DeviceFrame::new(frame, devices))
    }

    pub fn encode(&self) -> Result<String, ReplicationError> {
        serde_json::to_string(self).map_err(ReplicationError::Encode)
    }

    pub fn decode(json: &str) -> Result<Self, ReplicationError> {
        serde_json::from_str(json).map_err(ReplicationError::Decode)
    }
}

/// Holds a calibration packet back until calibration has finished.
#[derive(Debug, Default)]
pub struct FinishedGate {
    pending: Option<CalibrationPacket>,
    released: bool,
}

impl FinishedGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the packet to send. A later offer replaces an unsent one.
    pub fn offer(&mut self, packet: CalibrationPacket) {
        self.pending = Some(packet);
        self.released = false;
    }

    /// Releases the packet once, on the first poll where `finished` holds.
    pub fn poll(&mut self, finished: bool) -> Option<CalibrationPacket> {
        if !finished || self.released {
            return None;
        }
        let packet = self.pending.take()?;
        self.released = true;
        debug!("Replicating calibration of {}", packet.avatar_id);
        Some(packet)
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{AvatarDriver, SimulatedDriver};
    use approx::assert_relative_eq;

    fn steps() -> RootSteps {
        let at = |x, y| TrackedPose::at(Vector3::new(x, y, 0.0));
        RootSteps {
            head: at(0.0, 1.7),
            hand_left: at(-0.6, 1.4),
            hand_right: at(0.6, 1.4),
            pelvis: at(0.0, 1.0),
            foot_left: at(-0.1, 0.0),
            foot_right: at(0.1, 0.0),
        }
    }

    fn packet() -> CalibrationPacket {
        let measures = BodyMeasures {
            eyes_height: 1.7,
            root_steps: Some(steps()),
            ..Default::default()
        };
        CalibrationPacket::new(measures, ControllerStyle::CloseHandStretchArm, "mannequin")
    }

    #[test]
    fn test_packet_json_keeps_measures() {
        let p = packet();
        let json = p.encode().unwrap();
        assert!(json.contains("close_hand_stretch_arm") || json.contains("CloseHandStretchArm"));
        let back = CalibrationPacket::decode(&json).unwrap();
        assert_eq!(back.avatar_id, p.avatar_id);
        assert_relative_eq!(back.measures.eyes_height, 1.7);
        assert!(matches!(CalibrationPacket::decode("{"), Err(ReplicationError::Decode(_))));
    }

    #[test]
    fn test_root_step_frame_replays_through_driver() {
        let roles = replay_roles();
        let frame = packet().root_step_frame(&roles, 7).unwrap();
        assert_eq!(frame.devices.len(), 6);
        assert_eq!(frame.count(DeviceClass::Tracker), 3);

        let mut driver: AvatarDriver = SimulatedDriver::new(roles).unwrap().into();
        driver.refresh(frame);
        assert_relative_eq!(driver.pose(DeviceRole::FootLeft).unwrap().position.x, -0.1);
        assert_relative_eq!(driver.pose(DeviceRole::Head).unwrap().position.y, 1.7);
    }

    #[test]
    fn test_root_step_frame_needs_steps() {
        let mut p = packet();
        p.measures.root_steps = None;
        assert!(matches!(
            p.root_step_frame(&replay_roles(), 0),
            Err(ReplicationError::NoRootSteps)
        ));
    }

    #[test]
    fn test_tracker_packet_roles() {
        let roles = replay_roles();
        let mut driver: AvatarDriver = SimulatedDriver::new(roles.clone()).unwrap().into();
        driver.refresh(packet().root_step_frame(&roles, 0).unwrap());
        let update = TrackerPacket::capture(Uuid::nil(), &driver).unwrap();
        assert_relative_eq!(update.pose(DeviceRole::HandRight).position.x, 0.6);
        let frame = update.to_frame(&roles, 1).unwrap();
        assert_eq!(frame.active_pose(DeviceId(3)), Some(update.pose(DeviceRole::Pelvis)));
    }

    #[test]
    fn test_gate_releases_once_after_finish() {
        let mut gate = FinishedGate::new();
        gate.offer(packet());
        assert!(gate.poll(false).is_none());
        assert!(gate.poll(true).is_some());
        assert!(gate.poll(true).is_none());
        assert!(gate.is_released());
    }
}
