//! Confirm-action input abstraction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Source of the user's edge-triggered "confirm" action.
///
/// Whatever physical button the host maps to confirm, the engines only see
/// one boolean per tick.
pub trait ConfirmSource: Send {
    /// Returns true at most once per press.
    fn take_confirm(&mut self) -> bool;
}

/// Host-set confirm latch.
///
/// Clones share the latch: the input layer calls `press()`, the runtime
/// consumes the edge with `take_confirm()`.
#[derive(Debug, Clone, Default)]
pub struct ConfirmLatch {
    pressed: Arc<AtomicBool>,
}

impl ConfirmLatch {
    /// Creates an unpressed latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a press. Multiple presses before the next tick collapse into one.
    pub fn press(&self) {
        self.pressed.store(true, Ordering::SeqCst);
    }

    /// Returns true if a press is waiting.
    pub fn is_pending(&self) -> bool {
        self.pressed.load(Ordering::SeqCst)
    }
}

impl ConfirmSource for ConfirmLatch {
    fn take_confirm(&mut self) -> bool {
        self.pressed.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_is_edge_triggered() {
        let host = ConfirmLatch::new();
        let mut runtime_side = host.clone();

        assert!(!runtime_side.take_confirm());
        host.press();
        host.press();
        assert!(host.is_pending());
        assert!(runtime_side.take_confirm());
        assert!(!runtime_side.take_confirm());
    }
}
