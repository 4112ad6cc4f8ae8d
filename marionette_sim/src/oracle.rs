//! Ground truth oracle for simulation.
//!
//! The oracle owns the performer: a parametric body standing in a T-pose
//! whose six devices are what the runtime gets to see. Scenarios steer the
//! performer (turn the head, drop a tracker, reach past the arm) and the
//! oracle turns the truth into noisy per-tick device frames.

use marionette_core::{RoleMap, Side};
use marionette_env::{DeviceClass, DeviceFrame, DeviceId, DeviceRole, TrackedDevice, TrackedPose};
use nalgebra::{UnitQuaternion, Vector3};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Body proportions of the simulated user, as fractions of eye height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Performer {
    /// Eye height above the floor (meters)
    pub eyes_height: f64,

    /// Hand controller distance from the body midline
    pub hand_reach: f64,

    /// Controller height
    pub hand_height: f64,

    /// Waist tracker height
    pub pelvis_height: f64,

    /// Foot tracker distance from the midline
    pub foot_spread: f64,

    /// Foot tracker height above the floor
    pub foot_height: f64,

    /// Foot tracker distance in front of the pelvis
    pub foot_forward: f64,

    /// Where the performer stands
    pub position: Vector3<f64>,
}

impl Performer {
    /// An adult with the given eye height and average proportions.
    pub fn with_eyes_height(eyes_height: f64) -> Self {
        Self {
            eyes_height,
            hand_reach: 0.47 * eyes_height,
            hand_height: 0.87 * eyes_height,
            pelvis_height: 0.59 * eyes_height,
            foot_spread: 0.1,
            foot_height: 0.05,
            foot_forward: 0.1,
            position: Vector3::zeros(),
        }
    }
}

impl Default for Performer {
    fn default() -> Self {
        Self::with_eyes_height(1.7)
    }
}

/// The Oracle - the performer's true pose plus device synthesis.
pub struct BodyOracle {
    /// Seed the device ids and noise derive from
    physics_seed: u64,

    physics_rng: ChaCha8Rng,

    performer: Performer,

    /// Device id per role in `DeviceRole::ALL` order
    ids: [DeviceId; 6],

    /// Headset yaw relative to the body (degrees)
    head_yaw_deg: f64,

    /// Extra lateral reach per hand (left, right)
    reach: [f64; 2],

    /// Roles whose device has lost tracking
    lost: BTreeSet<DeviceRole>,

    /// Position noise; `None` when noise-free
    noise: Option<Normal<f64>>,

    current_time: f64,
}

impl BodyOracle {
    /// Creates an oracle with a default performer and 2 mm tracking noise.
    ///
    /// Controller and tracker ids are shuffled by the seed, so role
    /// discovery never depends on device order.
    pub fn new(physics_seed: u64) -> Self {
        let mut physics_rng = ChaCha8Rng::seed_from_u64(physics_seed);
        let mut pool: Vec<u32> = (1..6).collect();
        pool.shuffle(&mut physics_rng);
        let ids = [
            DeviceId(0),
            DeviceId(pool[0]),
            DeviceId(pool[1]),
            DeviceId(pool[2]),
            DeviceId(pool[3]),
            DeviceId(pool[4]),
        ];
        Self {
            physics_seed,
            physics_rng,
            performer: Performer::default(),
            ids,
            head_yaw_deg: 0.0,
            reach: [0.0; 2],
            lost: BTreeSet::new(),
            noise: Normal::new(0.0, 0.002).ok(),
            current_time: 0.0,
        }
    }

    pub fn with_performer(mut self, performer: Performer) -> Self {
        self.performer = performer;
        self
    }

    /// Sets the position noise standard deviation (meters). Zero disables noise.
    pub fn set_noise(&mut self, std_dev: f64) {
        self.noise = if std_dev > 0.0 {
            Normal::new(0.0, std_dev).ok()
        } else {
            None
        };
    }

    pub fn physics_seed(&self) -> u64 {
        self.physics_seed
    }

    pub fn performer(&self) -> &Performer {
        &self.performer
    }

    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;
    }

    /// Ground-truth device assignment.
    pub fn roles(&self) -> RoleMap {
        DeviceRole::ALL
            .iter()
            .zip(self.ids)
            .fold(RoleMap::new(), |map, (role, id)| map.with(*role, id))
    }

    pub fn device_id(&self, role: DeviceRole) -> DeviceId {
        self.ids[role_index(role)]
    }

    /// Turns the head away from the body plane.
    pub fn turn_head(&mut self, yaw_deg: f64) {
        self.head_yaw_deg = yaw_deg;
    }

    /// Moves one controller `extra` meters past the performer's T-pose reach.
    pub fn reach(&mut self, side: Side, extra: f64) {
        match side {
            Side::Left => self.reach[0] = extra,
            Side::Right => self.reach[1] = extra,
        }
    }

    pub fn lose(&mut self, role: DeviceRole) {
        self.lost.insert(role);
    }

    pub fn restore(&mut self, role: DeviceRole) {
        self.lost.remove(&role);
    }

    pub fn restore_all(&mut self) {
        self.lost.clear();
    }

    /// Noise-free pose of the device worn at `role`.
    pub fn truth(&self, role: DeviceRole) -> TrackedPose {
        let p = &self.performer;
        let local = match role {
            DeviceRole::Head => Vector3::new(0.0, p.eyes_height, 0.0),
            DeviceRole::HandLeft => Vector3::new(-(p.hand_reach + self.reach[0]), p.hand_height, 0.0),
            DeviceRole::HandRight => Vector3::new(p.hand_reach + self.reach[1], p.hand_height, 0.0),
            DeviceRole::Pelvis => Vector3::new(0.0, p.pelvis_height, 0.0),
            DeviceRole::FootLeft => Vector3::new(-p.foot_spread, p.foot_height, p.foot_forward),
            DeviceRole::FootRight => Vector3::new(p.foot_spread, p.foot_height, p.foot_forward),
        };
        let rotation = match role {
            DeviceRole::Head => UnitQuaternion::from_axis_angle(&Vector3::y_axis(), self.head_yaw_deg.to_radians()),
            _ => UnitQuaternion::identity(),
        };
        TrackedPose::new(p.position + local, rotation)
    }

    /// Samples one device snapshot.
    pub fn frame(&mut self, frame: u64) -> DeviceFrame {
        let devices = DeviceRole::ALL
            .into_iter()
            .map(|role| {
                let mut pose = self.truth(role);
                pose.position += self.jitter();
                let mut device = TrackedDevice::new(self.device_id(role), class_of(role), pose);
                device.active = !self.lost.contains(&role);
                device
            })
            .collect();
        DeviceFrame::new(frame, devices)
    }

    fn jitter(&mut self) -> Vector3<f64> {
        match self.noise {
            Some(normal) => Vector3::new(
                normal.sample(&mut self.physics_rng),
                normal.sample(&mut self.physics_rng),
                normal.sample(&mut self.physics_rng),
            ),
            None => Vector3::zeros(),
        }
    }
}

fn role_index(role: DeviceRole) -> usize {
    DeviceRole::ALL.iter().position(|r| *r == role).unwrap_or(0)
}

fn class_of(role: DeviceRole) -> DeviceClass {
    match role {
        DeviceRole::Head => DeviceClass::Headset,
        DeviceRole::HandLeft | DeviceRole::HandRight => DeviceClass::Controller,
        _ => DeviceClass::Tracker,
    }
}
