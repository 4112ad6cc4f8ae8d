//! Pose Sampler - single-shot, one-tick-deferred position capture.
//!
//! Tracked poses are only trustworthy at a fixed point of the frame cycle,
//! so `capture()` only records the request. The runtime calls `resolve()`
//! once per tick; the first tick after the request reads the device and
//! flips the sampler to done. Only one capture may be in flight.

use crate::driver::PoseSource;
use marionette_env::DeviceRole;
use nalgebra::Vector3;
use thiserror::Error;

/// Sampler contract violations and capture outcomes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SamplerError {
    #[error("Capture already in flight for {0}")]
    Busy(DeviceRole),

    #[error("Read while capture for {0} is still in flight")]
    CaptureInFlight(DeviceRole),

    #[error("Nothing has been captured")]
    Empty,

    #[error("Device for {0} was not tracked when sampled")]
    DeviceUnavailable(DeviceRole),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SamplerState {
    Idle,
    Pending { role: DeviceRole, requested_frame: u64 },
    Ready { role: DeviceRole, position: Vector3<f64> },
    Lost { role: DeviceRole },
}

/// The one shared capture slot.
#[derive(Debug, Clone)]
pub struct PoseSampler {
    state: SamplerState,
}

impl PoseSampler {
    pub fn new() -> Self {
        Self {
            state: SamplerState::Idle,
        }
    }

    /// Requests a sample of `role` at the next tick after `frame`.
    ///
    /// Requesting while a capture is pending is a contract violation.
    pub fn capture(&mut self, role: DeviceRole, frame: u64) -> Result<(), SamplerError> {
        if let SamplerState::Pending { role: pending, .. } = self.state {
            debug_assert!(false, "capture({role}) requested while {pending} is in flight");
            return Err(SamplerError::Busy(pending));
        }
        self.state = SamplerState::Pending {
            role,
            requested_frame: frame,
        };
        Ok(())
    }

    /// Completes a pending capture once a later tick arrives.
    pub fn resolve<S: PoseSource + ?Sized>(&mut self, frame: u64, source: &S) {
        if let SamplerState::Pending {
            role,
            requested_frame,
        } = self.state
        {
            if frame > requested_frame {
                self.state = match source.pose(role) {
                    Some(pose) => SamplerState::Ready {
                        role,
                        position: pose.position,
                    },
                    None => SamplerState::Lost { role },
                };
            }
        }
    }

    /// True while a capture is waiting for its tick.
    pub fn is_capturing(&self) -> bool {
        matches!(self.state, SamplerState::Pending { .. })
    }

    /// The `done` flag: no capture in flight.
    pub fn is_done(&self) -> bool {
        !self.is_capturing()
    }

    /// Returns the captured position.
    ///
    /// Reading while capturing aborts in debug builds.
    pub fn read(&self) -> Result<Vector3<f64>, SamplerError> {
        match self.state {
            SamplerState::Pending { role, .. } => {
                debug_assert!(false, "read() while capture for {role} is in flight");
                Err(SamplerError::CaptureInFlight(role))
            }
            SamplerState::Ready { position, .. } => Ok(position),
            SamplerState::Lost { role } => Err(SamplerError::DeviceUnavailable(role)),
            SamplerState::Idle => Err(SamplerError::Empty),
        }
    }

    /// Role of the last capture, if any.
    pub fn role(&self) -> Option<DeviceRole> {
        match self.state {
            SamplerState::Idle => None,
            SamplerState::Pending { role, .. }
            | SamplerState::Ready { role, .. }
            | SamplerState::Lost { role } => Some(role),
        }
    }
}

impl Default for PoseSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_env::TrackedPose;

    struct Fixed(Option<Vector3<f64>>);

    impl PoseSource for Fixed {
        fn pose(&self, _role: DeviceRole) -> Option<TrackedPose> {
            self.0.map(TrackedPose::at)
        }
        fn is_ready(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_capture_is_deferred_one_tick() {
        let src = Fixed(Some(Vector3::new(0.0, 1.7, 0.0)));
        let mut sampler = PoseSampler::new();
        assert_eq!(sampler.read(), Err(SamplerError::Empty));

        sampler.capture(DeviceRole::Head, 10).unwrap();
        assert!(sampler.is_capturing());

        sampler.resolve(10, &src);
        assert!(sampler.is_capturing(), "same tick must not resolve");

        sampler.resolve(11, &src);
        assert!(sampler.is_done());
        assert_eq!(sampler.read(), Ok(Vector3::new(0.0, 1.7, 0.0)));
        assert_eq!(sampler.role(), Some(DeviceRole::Head));
    }

    #[test]
    fn test_lost_device_reports_unavailable() {
        let mut sampler = PoseSampler::new();
        sampler.capture(DeviceRole::FootLeft, 0).unwrap();
        sampler.resolve(1, &Fixed(None));
        assert_eq!(
            sampler.read(),
            Err(SamplerError::DeviceUnavailable(DeviceRole::FootLeft))
        );
    }

    #[test]
    fn test_sampler_is_reusable() {
        let mut sampler = PoseSampler::new();
        sampler.capture(DeviceRole::Pelvis, 0).unwrap();
        sampler.resolve(1, &Fixed(Some(Vector3::new(0.0, 1.0, 0.0))));
        sampler.capture(DeviceRole::FootRight, 1).unwrap();
        sampler.resolve(2, &Fixed(Some(Vector3::new(0.1, 0.0, 0.0))));
        assert_eq!(sampler.read(), Ok(Vector3::new(0.1, 0.0, 0.0)));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "in flight")]
    fn test_read_in_flight_aborts() {
        let mut sampler = PoseSampler::new();
        sampler.capture(DeviceRole::Head, 0).unwrap();
        let _ = sampler.read();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "in flight")]
    fn test_double_capture_aborts() {
        let mut sampler = PoseSampler::new();
        sampler.capture(DeviceRole::Head, 0).unwrap();
        let _ = sampler.capture(DeviceRole::Pelvis, 0);
    }
}
