// src/nats/backoff.rs
use std::time::Duration;

/// Reconnect delay policy: `min(base * 2^(attempt-1), cap)` for attempt
/// `1..=max_attempts`, then a fixed cool-down before the counter restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            cap: Duration::from_millis(30_000),
            max_attempts: 10,
            cooldown: Duration::from_millis(60_000),
        }
    }
}

impl Backoff {
    /// Delay before the `attempt`-th consecutive reconnect (1-based).
    /// `attempt == 0` is treated as the first attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// True once `attempts` consecutive failures exhaust the budget and the
    /// cool-down should kick in.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
