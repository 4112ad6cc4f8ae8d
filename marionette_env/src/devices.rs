//! Device snapshot source abstraction.

use crate::error::EnvError;
use crate::types::DeviceFrame;
use std::sync::{Arc, Mutex};

/// Source of one device snapshot per tick.
///
/// The hardware-binding layer lives behind this trait. The engines read
/// snapshots and never hold device handles.
pub trait DeviceSource: Send {
    /// Returns the devices for the current tick.
    fn snapshot(&mut self) -> Result<DeviceFrame, EnvError>;
}

/// Device feed the host publishes into from its own thread or loop.
#[derive(Debug, Clone, Default)]
pub struct SharedDeviceFeed {
    latest: Arc<Mutex<Option<DeviceFrame>>>,
}

impl SharedDeviceFeed {
    /// Creates an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the latest frame.
    pub fn publish(&self, frame: DeviceFrame) -> Result<(), EnvError> {
        let mut latest = self
            .latest
            .lock()
            .map_err(|_| EnvError::poisoned("device feed"))?;
        *latest = Some(frame);
        Ok(())
    }
}

impl DeviceSource for SharedDeviceFeed {
    fn snapshot(&mut self) -> Result<DeviceFrame, EnvError> {
        let latest = self
            .latest
            .lock()
            .map_err(|_| EnvError::poisoned("device feed"))?;
        latest.clone().ok_or(EnvError::NoFrame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceClass, DeviceId, TrackedDevice, TrackedPose};

    #[test]
    fn test_feed_requires_publish() {
        let mut feed = SharedDeviceFeed::new();
        assert!(matches!(feed.snapshot(), Err(EnvError::NoFrame)));
    }

    #[test]
    fn test_feed_returns_latest() {
        let host = SharedDeviceFeed::new();
        let mut reader = host.clone();

        host.publish(DeviceFrame::new(1, vec![])).unwrap();
        host.publish(DeviceFrame::new(
            2,
            vec![TrackedDevice::new(
                DeviceId(4),
                DeviceClass::Tracker,
                TrackedPose::default(),
            )],
        ))
        .unwrap();

        let frame = reader.snapshot().unwrap();
        assert_eq!(frame.frame, 2);
        assert_eq!(frame.devices.len(), 1);
    }
}
