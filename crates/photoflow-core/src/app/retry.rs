//! Backoff timing for change-feed reconnects and scheduled handler retries.

use std::time::Duration;

/// Exponential backoff: `delay = base_delay * multiplier^(attempts - 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    pub multiplier: f64,

    /// Upper bound for any single wait.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// base 2s, doubling: 2s, 4s, 8s, 16s, ... capped at one hour.
    pub fn standard() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60 * 60),
        }
    }

    /// # Arguments
    /// * `attempts` - failures so far (1-indexed). `0` is treated as `1`.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Consecutive-failure counter for opening the change feed.
///
/// `record_failure` returns the wait before the next attempt, or `None` once
/// `max_attempts` consecutive failures have been seen. A successful open
/// resets the counter.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    policy: RetryPolicy,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(policy: RetryPolicy, max_attempts: u32) -> Self {
        Self {
            policy,
            max_attempts,
            attempts: 0,
        }
    }

    pub fn record_failure(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            None
        } else {
            Some(self.policy.next_delay(self.attempts))
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
