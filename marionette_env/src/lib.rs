//! Marionette Environment Abstraction Layer
//!
//! This crate separates the avatar engines from everything the host owns:
//! - Time (`now()`, frame counter)
//! - Tracked devices (one pose snapshot per tick)
//! - The user "confirm" action
//! - Ground queries used to snap a spawned avatar onto the floor
//!
//! Production hosts feed these handles from their render loop. The
//! simulation harness drives them from a virtual clock and a seeded
//! performer, so every calibration run is reproducible.
//!
//! # Example
//!
//! ```ignore
//! use marionette_env::{ConfirmLatch, SharedDeviceFeed, SystemContext};
//!
//! let ctx = SystemContext::shared();
//! let feed = SharedDeviceFeed::new();
//! let confirm = ConfirmLatch::new();
//!
//! loop {
//!     feed.publish(read_hardware());
//!     if trigger_pulled() { confirm.press(); }
//!     runtime.tick();
//!     ctx.advance_frame();
//! }
//! ```

mod context;
mod devices;
mod error;
mod floor;
mod input;
mod system_impl;
mod types;

pub use context::MarionetteContext;
pub use devices::{DeviceSource, SharedDeviceFeed};
pub use error::EnvError;
pub use floor::{FlatFloor, FloorProbe};
pub use input::{ConfirmLatch, ConfirmSource};
pub use system_impl::SystemContext;
pub use types::{DeviceClass, DeviceFrame, DeviceId, DeviceRole, TrackedDevice, TrackedPose};
