//! Shared fixtures for unit tests: a hand-stepped clock and a T-pose rig.

use marionette_env::{DeviceClass, DeviceFrame, DeviceId, MarionetteContext, TrackedDevice, TrackedPose};
use nalgebra::Vector3;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Clock advanced explicitly by the test.
#[derive(Default)]
pub struct StepClock {
    nanos: AtomicU64,
    frame: AtomicU64,
}

impl StepClock {
    /// Advances one frame of `dt_secs`.
    pub fn step(&self, dt_secs: f64) {
        self.nanos
            .fetch_add(Duration::from_secs_f64(dt_secs).as_nanos() as u64, Ordering::SeqCst);
        self.frame.fetch_add(1, Ordering::SeqCst);
    }
}

impl MarionetteContext for StepClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn frame(&self) -> u64 {
        self.frame.load(Ordering::SeqCst)
    }

    fn seed(&self) -> u64 {
        0
    }
}

/// Headset 0, controllers 3/4, trackers 5/6/8 in the canonical T-pose.
pub fn t_pose_frame(frame: u64) -> DeviceFrame {
    let dev = |id: u32, class, x: f64, y: f64| {
        TrackedDevice::new(DeviceId(id), class, TrackedPose::at(Vector3::new(x, y, 0.0)))
    };
    DeviceFrame::new(
        frame,
        vec![
            dev(0, DeviceClass::Headset, 0.0, 1.7),
            dev(3, DeviceClass::Controller, 0.6, 1.4),
            dev(4, DeviceClass::Controller, -0.6, 1.4),
            dev(5, DeviceClass::Tracker, 0.1, 0.0),
            dev(6, DeviceClass::Tracker, 0.0, 1.0),
            dev(8, DeviceClass::Tracker, -0.1, 0.0),
        ],
    )
}
