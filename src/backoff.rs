//! Exponential backoff for the retry scheduler.

use std::time::Duration;

use rand::Rng;

/// Exponential retry backoff: `base * 2^(attempt - 1)`, saturating at `max`.
///
/// Attempt numbers are 1-indexed; attempt 1 waits the base delay.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    base: Duration,
    max: Duration,
}

/// Upper bound applied to every computed delay unless overridden.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

impl RetryBackoff {
    pub fn new(base: Duration) -> Self {
        Self { base, max: DEFAULT_MAX_DELAY }
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Delay for the given attempt number, with overflow saturation.
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.checked_mul(multiplier).unwrap_or(self.max).min(self.max)
    }

    /// Apply jitter bounded at 10% of the delay, to spread synchronized retries.
    pub fn jittered(&self, delay: Duration) -> Duration {
        let millis = delay.as_millis() as u64;
        let spread = millis / 10;
        if spread == 0 {
            return delay;
        }
        let offset = rand::rng().random_range(0..=spread);
        Duration::from_millis(millis.saturating_add(offset)).min(self.max)
    }
}
