//! Scripted confirm presses.

use crate::context::SimContext;
use marionette_env::{ConfirmSource, MarionetteContext};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Presses confirm at fixed virtual times, at most once per tick.
pub struct ConfirmScript {
    ctx: Arc<SimContext>,
    pending: VecDeque<Duration>,
    pressed: u64,
}

impl ConfirmScript {
    pub fn new(ctx: Arc<SimContext>, times_secs: &[f64]) -> Self {
        let mut pending: Vec<Duration> = times_secs
            .iter()
            .map(|t| Duration::from_secs_f64(t.max(0.0)))
            .collect();
        pending.sort();
        Self {
            ctx,
            pending: pending.into(),
            pressed: 0,
        }
    }

    /// Script with up to `max_delay_secs` of seeded reaction time added to each press.
    pub fn with_reaction(ctx: Arc<SimContext>, times_secs: &[f64], max_delay_secs: f64) -> Self {
        let delayed: Vec<f64> = times_secs
            .iter()
            .map(|t| t + ctx.with_rng(|rng| rng.gen_range(0.0..=max_delay_secs.max(0.0))))
            .collect();
        Self::new(ctx, &delayed)
    }

    /// Presses delivered so far.
    pub fn pressed(&self) -> u64 {
        self.pressed
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl ConfirmSource for ConfirmScript {
    fn take_confirm(&mut self) -> bool {
        match self.pending.front() {
            Some(due) if *due <= self.ctx.now() => {
                self.pending.pop_front();
                self.pressed += 1;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presses_fire_in_order_once_per_tick() {
        let ctx = SimContext::shared(0);
        let mut script = ConfirmScript::new(ctx.clone(), &[0.2, 0.1]);
        assert!(!script.take_confirm());

        ctx.step(Duration::from_millis(300));
        assert!(script.take_confirm());
        assert_eq!(script.remaining(), 1);
        assert!(script.take_confirm());
        assert!(!script.take_confirm());
        assert_eq!(script.pressed(), 2);
    }

    #[test]
    fn test_reaction_delay_is_seeded_and_bounded() {
        let a = ConfirmScript::with_reaction(SimContext::shared(4), &[1.0], 0.25);
        let b = ConfirmScript::with_reaction(SimContext::shared(4), &[1.0], 0.25);
        assert_eq!(a.pending, b.pending);
        let due = a.pending[0].as_secs_f64();
        assert!((1.0..=1.25).contains(&due));
    }
}
