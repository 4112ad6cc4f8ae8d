//! Marionette Deterministic Simulation Harness
//!
//! Runs the complete calibration and IK runtime against a synthetic user so
//! every flow can be replayed bit for bit from one 64-bit seed:
//! - **Time**: a virtual clock the scenario loop steps at a fixed tick rate
//! - **Devices**: a seeded performer whose six trackers carry Gaussian noise
//! - **Input**: confirm presses scripted in virtual time, with seeded reaction delay
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Session                          │
//! │  SimContext ──────────────┬───────────────┐              │
//! │       │                   │               │              │
//! │  ┌────▼───────┐     ┌─────▼──────┐  ┌─────▼─────────┐    │
//! │  │ BodyOracle │────►│ DeviceFeed │─►│ AvatarRuntime │    │
//! │  │ (performer)│     └────────────┘  │ calib + IK    │    │
//! │  └────────────┘   ConfirmScript ───►│               │    │
//! │                                     └───────────────┘    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use marionette_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::TPoseCalibration);
//! assert!(result.passed);
//! ```

mod context;
mod oracle;
mod runner;
mod script;
pub mod scenarios;

pub use context::SimContext;
pub use oracle::{BodyOracle, Performer};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, SimError};
pub use scenarios::ScenarioId;
pub use script::ConfirmScript;
