//! Retry policy for the commit CAS loop
//!
//! The publication loop retries transparently after a lost CAS race. The
//! policy bounding those retries is injected per branch rather than being
//! an implicit infinite spin: latency-bound callers can cap attempts, and
//! backoff keeps pathological contention from starving losers.

use std::time::Duration;

/// Bounds and pacing for commit retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Give up with a conflict after this many lost races; `None` retries
    /// until the commit resolves
    pub max_attempts: Option<u32>,
    /// First backoff step; doubled per lost race
    pub backoff_base: Duration,
    /// Upper bound on a single backoff step
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    /// Unbounded attempts with a capped exponential backoff. Commit CAS
    /// sections are short, so the first loss just yields; later losses
    /// sleep briefly to shed contention.
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_base: Duration::from_micros(10),
            backoff_cap: Duration::from_millis(1),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, forever, with no pacing at all
    pub fn spin() -> Self {
        Self {
            max_attempts: None,
            backoff_base: Duration::ZERO,
            backoff_cap: Duration::ZERO,
        }
    }

    /// True when `attempts` lost races exhaust the policy
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Pause appropriately before the next attempt
    pub fn backoff(&self, attempts: u32) {
        if self.backoff_base.is_zero() {
            std::hint::spin_loop();
            return;
        }
        if attempts <= 1 {
            std::thread::yield_now();
            return;
        }
        let exp = attempts.saturating_sub(1).min(20);
        let step = self
            .backoff_base
            .saturating_mul(1u32 << exp.min(16))
            .min(self.backoff_cap);
        std::thread::sleep(step);
    }
}
