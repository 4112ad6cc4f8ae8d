//! Tracking drivers - turn raw device snapshots into six role poses.
//!
//! Two variants share one capability interface:
//! - `Simulated`: roles come from an injected, eagerly validated `RoleMap`
//! - `HardwareTracked`: roles are discovered by device identification

use crate::identification::{identify_devices, Candidate, IdentificationConfig, IdentifyError};
use marionette_env::{DeviceClass, DeviceFrame, DeviceId, DeviceRole, TrackedPose};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while building a driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("Role map has no device for {0}")]
    MissingRole(DeviceRole),

    #[error("Device {0} is mapped to more than one role")]
    DuplicateDevice(DeviceId),
}

/// What the engines need from any driver.
pub trait PoseSource {
    /// Live pose of a role, `None` while unassigned or inactive.
    fn pose(&self, role: DeviceRole) -> Option<TrackedPose>;

    /// True once every role is bound to a device.
    fn is_ready(&self) -> bool;
}

// ============================================================================
// ROLE MAP
// ============================================================================

/// Explicit role -> device table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMap {
    roles: BTreeMap<DeviceRole, DeviceId>,
}

impl RoleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, role: DeviceRole, id: DeviceId) -> Self {
        self.roles.insert(role, id);
        self
    }

    pub fn insert(&mut self, role: DeviceRole, id: DeviceId) {
        self.roles.insert(role, id);
    }

    pub fn get(&self, role: DeviceRole) -> Option<DeviceId> {
        self.roles.get(&role).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceRole, DeviceId)> + '_ {
        self.roles.iter().map(|(r, id)| (*r, *id))
    }

    /// Checks that all six roles are bound to distinct devices.
    pub fn validate(&self) -> Result<(), DriverError> {
        for role in DeviceRole::ALL {
            if !self.roles.contains_key(&role) {
                return Err(DriverError::MissingRole(role));
            }
        }
        let mut seen = Vec::with_capacity(self.roles.len());
        for id in self.roles.values() {
            if seen.contains(id) {
                return Err(DriverError::DuplicateDevice(*id));
            }
            seen.push(*id);
        }
        Ok(())
    }
}

// ============================================================================
// SIMULATED DRIVER
// ============================================================================

/// Driver with a fixed, pre-validated role table. Ready from construction.
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    roles: RoleMap,
    frame: DeviceFrame,
}

impl SimulatedDriver {
    /// Fails fast if any role is missing or doubly mapped.
    pub fn new(roles: RoleMap) -> Result<Self, DriverError> {
        roles.validate()?;
        Ok(Self {
            roles,
            frame: DeviceFrame::default(),
        })
    }

    pub fn roles(&self) -> &RoleMap {
        &self.roles
    }
}

impl PoseSource for SimulatedDriver {
    fn pose(&self, role: DeviceRole) -> Option<TrackedPose> {
        self.frame.active_pose(self.roles.get(role)?)
    }

    fn is_ready(&self) -> bool {
        true
    }
}

// ============================================================================
// HARDWARE DRIVER
// ============================================================================

/// Active controller/tracker counts seen in the latest frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionCounts {
    pub controllers: usize,
    pub trackers: usize,
}

/// Driver for real hardware: roles are discovered from a T-pose.
#[derive(Debug, Clone)]
pub struct HardwareDriver {
    config: IdentificationConfig,
    roles: Option<RoleMap>,
    frame: DeviceFrame,
}

impl HardwareDriver {
    pub fn new(config: IdentificationConfig) -> Self {
        Self {
            config,
            roles: None,
            frame: DeviceFrame::default(),
        }
    }

    /// Counts active controllers and trackers.
    pub fn detect(&self) -> DetectionCounts {
        DetectionCounts {
            controllers: self.frame.count(DeviceClass::Controller),
            trackers: self.frame.count(DeviceClass::Tracker),
        }
    }

    /// True when enough devices are present to attempt identification.
    pub fn has_enough_devices(&self) -> bool {
        let counts = self.detect();
        counts.controllers >= self.config.min_controllers
            && counts.trackers >= self.config.min_trackers
    }

    /// Runs identification against the latest frame.
    ///
    /// On failure the previous assignment (if any) is left untouched.
    pub fn identify(&mut self) -> Result<&RoleMap, IdentifyError> {
        let head = self.frame.headset().ok_or(IdentifyError::NoHeadset)?;
        let candidates = |class: DeviceClass| -> Vec<Candidate> {
            self.frame
                .active_of(class)
                .map(|d| Candidate::new(d.id, d.pose.position))
                .collect()
        };
        let controllers = candidates(DeviceClass::Controller);
        let trackers = candidates(DeviceClass::Tracker);

        let roles = identify_devices(head.id, &head.pose, &controllers, &trackers, &self.config)?;
        info!("Devices identified: {:?}", roles);
        Ok(self.roles.insert(roles))
    }

    pub fn roles(&self) -> Option<&RoleMap> {
        self.roles.as_ref()
    }
}

impl PoseSource for HardwareDriver {
    fn pose(&self, role: DeviceRole) -> Option<TrackedPose> {
        let id = self.roles.as_ref()?.get(role)?;
        self.frame.active_pose(id)
    }

    fn is_ready(&self) -> bool {
        self.roles.is_some()
    }
}

// ============================================================================
// TAGGED DRIVER
// ============================================================================

/// Driver kind, for logging and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverKind {
    Simulated,
    HardwareTracked,
}

/// The driver selected at construction.
#[derive(Debug, Clone)]
pub enum AvatarDriver {
    Simulated(SimulatedDriver),
    HardwareTracked(HardwareDriver),
}

impl AvatarDriver {
    pub fn kind(&self) -> DriverKind {
        match self {
            AvatarDriver::Simulated(_) => DriverKind::Simulated,
            AvatarDriver::HardwareTracked(_) => DriverKind::HardwareTracked,
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.kind() == DriverKind::Simulated
    }

    /// Installs this tick's snapshot. Hardware drivers keep at most
    /// `max_devices` entries.
    pub fn refresh(&mut self, mut frame: DeviceFrame) {
        match self {
            AvatarDriver::Simulated(d) => d.frame = frame,
            AvatarDriver::HardwareTracked(d) => {
                if frame.devices.len() > d.config.max_devices {
                    debug!(
                        "Ignoring {} devices beyond the first {}",
                        frame.devices.len() - d.config.max_devices,
                        d.config.max_devices
                    );
                    frame.devices.truncate(d.config.max_devices);
                }
                d.frame = frame;
            }
        }
    }

    /// Detection counts. A simulated driver reports its bound roles.
    pub fn detect(&self) -> DetectionCounts {
        match self {
            AvatarDriver::Simulated(_) => DetectionCounts {
                controllers: 2,
                trackers: 3,
            },
            AvatarDriver::HardwareTracked(d) => d.detect(),
        }
    }

    /// True when identification can be attempted.
    pub fn has_enough_devices(&self) -> bool {
        match self {
            AvatarDriver::Simulated(_) => true,
            AvatarDriver::HardwareTracked(d) => d.has_enough_devices(),
        }
    }

    /// Runs identification. A simulated driver is already identified.
    pub fn identify(&mut self) -> Result<(), IdentifyError> {
        match self {
            AvatarDriver::Simulated(_) => Ok(()),
            AvatarDriver::HardwareTracked(d) => d.identify().map(|_| ()),
        }
    }
}

impl PoseSource for AvatarDriver {
    fn pose(&self, role: DeviceRole) -> Option<TrackedPose> {
        match self {
            AvatarDriver::Simulated(d) => d.pose(role),
            AvatarDriver::HardwareTracked(d) => d.pose(role),
        }
    }

    fn is_ready(&self) -> bool {
        match self {
            AvatarDriver::Simulated(d) => d.is_ready(),
            AvatarDriver::HardwareTracked(d) => d.is_ready(),
        }
    }
}

impl From<SimulatedDriver> for AvatarDriver {
    fn from(d: SimulatedDriver) -> Self {
        AvatarDriver::Simulated(d)
    }
}

impl From<HardwareDriver> for AvatarDriver {
    fn from(d: HardwareDriver) -> Self {
        AvatarDriver::HardwareTracked(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_env::TrackedDevice;
    use nalgebra::Vector3;

    fn full_map() -> RoleMap {
        DeviceRole::ALL
            .iter()
            .enumerate()
            .fold(RoleMap::new(), |m, (i, r)| m.with(*r, DeviceId(i as u32)))
    }

    fn tpose_frame() -> DeviceFrame {
        let dev = |id: u32, class, x: f64, y: f64| {
            TrackedDevice::new(DeviceId(id), class, TrackedPose::at(Vector3::new(x, y, 0.0)))
        };
        DeviceFrame::new(
            0,
            vec![
                dev(0, DeviceClass::Headset, 0.0, 1.7),
                dev(7, DeviceClass::Other, 2.0, 2.5),
                dev(3, DeviceClass::Controller, 0.6, 1.4),
                dev(4, DeviceClass::Controller, -0.6, 1.4),
                dev(5, DeviceClass::Tracker, 0.1, 0.0),
                dev(6, DeviceClass::Tracker, 0.0, 1.0),
                dev(8, DeviceClass::Tracker, -0.1, 0.0),
            ],
        )
    }

    #[test]
    fn test_role_map_validation() {
        assert!(full_map().validate().is_ok());

        let mut missing = RoleMap::new();
        missing.insert(DeviceRole::Head, DeviceId(0));
        assert_eq!(
            missing.validate(),
            Err(DriverError::MissingRole(DeviceRole::HandLeft))
        );

        let dup = full_map().with(DeviceRole::FootRight, DeviceId(0));
        assert_eq!(dup.validate(), Err(DriverError::DuplicateDevice(DeviceId(0))));
    }

    #[test]
    fn test_simulated_driver_fails_fast() {
        assert!(SimulatedDriver::new(RoleMap::new()).is_err());
        let driver = SimulatedDriver::new(full_map()).unwrap();
        assert!(driver.is_ready());
    }

    #[test]
    fn test_simulated_driver_reads_roles() {
        let mut driver: AvatarDriver = SimulatedDriver::new(full_map()).unwrap().into();
        let mut frame = DeviceFrame::new(
            0,
            vec![TrackedDevice::new(
                DeviceId(3),
                DeviceClass::Tracker,
                TrackedPose::at(Vector3::new(0.0, 1.0, 0.0)),
            )],
        );
        driver.refresh(frame.clone());
        assert_eq!(
            driver.pose(DeviceRole::Pelvis).map(|p| p.position),
            Some(Vector3::new(0.0, 1.0, 0.0))
        );
        assert!(driver.pose(DeviceRole::Head).is_none());

        frame.devices[0].active = false;
        driver.refresh(frame);
        assert!(driver.pose(DeviceRole::Pelvis).is_none());
    }

    #[test]
    fn test_hardware_driver_identifies() {
        let mut driver: AvatarDriver = HardwareDriver::new(IdentificationConfig::default()).into();
        assert!(!driver.is_ready());

        driver.refresh(tpose_frame());
        assert_eq!(driver.detect(), DetectionCounts { controllers: 2, trackers: 3 });
        assert!(driver.has_enough_devices());

        driver.identify().unwrap();
        assert!(driver.is_ready());
        assert_eq!(
            driver.pose(DeviceRole::HandLeft).map(|p| p.position.x),
            Some(-0.6)
        );
        assert_eq!(
            driver.pose(DeviceRole::Pelvis).map(|p| p.position.y),
            Some(1.0)
        );
    }

    #[test]
    fn test_hardware_driver_failure_keeps_state() {
        let mut hw = HardwareDriver::new(IdentificationConfig::default());
        let mut frame = tpose_frame();
        frame.devices.retain(|d| d.class != DeviceClass::Headset);
        hw.frame = frame;
        assert_eq!(hw.identify().unwrap_err(), IdentifyError::NoHeadset);
        assert!(!hw.is_ready());
    }

    #[test]
    fn test_hardware_driver_caps_device_count() {
        let mut driver: AvatarDriver = HardwareDriver::new(IdentificationConfig {
            max_devices: 3,
            ..Default::default()
        })
        .into();
        driver.refresh(tpose_frame());
        assert_eq!(driver.detect(), DetectionCounts { controllers: 1, trackers: 0 });
        assert!(!driver.has_enough_devices());
    }
}
