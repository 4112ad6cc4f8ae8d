//! Simulation context implementing MarionetteContext for deterministic runs.

use marionette_env::MarionetteContext;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Virtual clock plus frame counter, stepped by the scenario loop.
///
/// Clones share the same clock, so the runtime and the harness always
/// agree on "now".
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// (virtual nanoseconds, completed frames)
    clock: Arc<Mutex<(u64, u64)>>,

    /// Entropy for anything the harness randomizes outside the oracle
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            clock: Arc::new(Mutex::new((0, 0))),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    fn clock(&self) -> MutexGuard<'_, (u64, u64)> {
        self.clock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Advances virtual time without completing a frame.
    pub fn advance_time(&self, duration: Duration) {
        self.clock().0 += duration.as_nanos() as u64;
    }

    /// Completes one render tick of length `dt`. Returns the new frame number.
    pub fn step(&self, dt: Duration) -> u64 {
        let mut clock = self.clock();
        clock.0 += dt.as_nanos() as u64;
        clock.1 += 1;
        clock.1
    }

    /// Runs `f` with the context's seeded generator.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut ChaCha8Rng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut rng)
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            clock: Arc::clone(&self.clock),
            rng: Arc::clone(&self.rng),
        }
    }
}

impl MarionetteContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.clock().0)
    }

    fn frame(&self) -> u64 {
        self.clock().1
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_virtual_time_and_frames() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);
        assert_eq!(ctx.frame(), 0);

        assert_eq!(ctx.step(Duration::from_millis(20)), 1);
        ctx.advance_time(Duration::from_millis(5));
        assert_eq!(ctx.now(), Duration::from_millis(25));
        assert_eq!(ctx.frame(), 1);
        assert_eq!(ctx.seed(), 42);
    }

    #[test]
    fn test_clones_share_clock() {
        let ctx = SimContext::new(1);
        let other = ctx.clone();
        ctx.step(Duration::from_secs(1));
        assert_eq!(other.now(), Duration::from_secs(1));
        assert_eq!(other.frame(), 1);
    }

    #[test]
    fn test_rng_is_seeded() {
        let a: u64 = SimContext::new(7).with_rng(|r| r.gen());
        let b: u64 = SimContext::new(7).with_rng(|r| r.gen());
        assert_eq!(a, b);
    }
}
