//! Backoff policy for rate-limited and truncated generation attempts.

use std::time::Duration;

use rand::Rng;

use photoblog_shared::RetryTrigger;

/// Total attempts per generation call, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// How long to wait between attempts.
///
/// The delay after failed attempt `n` (0-based) is `base * 2^n + jitter`,
/// where `base` depends on why the attempt failed and `jitter` is uniform
/// in `[0, max_jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_base: Duration,
    pub truncation_base: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            rate_limit_base: Duration::from_secs(2),
            truncation_base: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no waiting. Used by offline runs and tests.
    pub fn no_delay() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            rate_limit_base: Duration::ZERO,
            truncation_base: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Base delay for a trigger, before exponential growth.
    pub fn base_for(&self, trigger: RetryTrigger) -> Duration {
        match trigger {
            RetryTrigger::RateLimited => self.rate_limit_base,
            RetryTrigger::Truncated => self.truncation_base,
        }
    }

    /// Deterministic part of the delay after failed attempt `attempt` (0-based).
    pub fn backoff(&self, trigger: RetryTrigger, attempt: u32) -> Duration {
        self.base_for(trigger)
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Full delay including jitter.
    pub fn delay_for(&self, trigger: RetryTrigger, attempt: u32) -> Duration {
        self.backoff(trigger, attempt) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..max_ms))
    }
}
