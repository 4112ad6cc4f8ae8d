//! Core environment context trait for Marionette runtimes.

use std::time::Duration;

/// The clock handle every engine receives at construction.
///
/// Calibration debounces and the pose sampler's one-tick deferral are
/// expressed against this trait, never against `Instant::now()`.
///
/// # Implementations
///
/// - **Production**: `SystemContext` - monotonic `Instant`, host-advanced frames
/// - **Simulation**: `SimContext` - virtual clock stepped by the harness
pub trait MarionetteContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the number of completed render ticks.
    ///
    /// Used for one-tick sample deferral and frame-counted settle waits.
    fn frame(&self) -> u64;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
