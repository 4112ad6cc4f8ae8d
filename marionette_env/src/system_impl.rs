//! Production implementation of MarionetteContext.

use crate::context::MarionetteContext;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Production context backed by the OS monotonic clock.
///
/// The host advances the frame counter once per rendered frame.
pub struct SystemContext {
    /// Instant when this context was created
    start: Instant,

    /// Completed frames
    frame: AtomicU64,
}

impl SystemContext {
    /// Creates a new SystemContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            frame: AtomicU64::new(0),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Marks the end of a rendered frame and returns the new frame number.
    pub fn advance_frame(&self) -> u64 {
        self.frame.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for SystemContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MarionetteContext for SystemContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn frame(&self) -> u64 {
        self.frame.load(Ordering::SeqCst)
    }

    fn seed(&self) -> u64 {
        0 // Production context is not seeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_context_frames() {
        let ctx = SystemContext::new();
        assert_eq!(ctx.frame(), 0);
        assert_eq!(ctx.advance_frame(), 1);
        assert_eq!(ctx.advance_frame(), 2);
        assert_eq!(ctx.frame(), 2);
        assert_eq!(ctx.seed(), 0);
    }

    #[test]
    fn test_system_context_now_monotonic() {
        let ctx = SystemContext::new();
        let t1 = ctx.now();
        let t2 = ctx.now();
        assert!(t2 >= t1);
    }
}
