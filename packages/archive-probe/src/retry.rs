//! Bounded retry with exponential backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::manifest::duration_secs;

/// Retry policy shared by range fetches, page fetches and sink delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(with = "duration_secs")]
    pub initial_backoff: Duration,

    /// Upper bound for any single delay
    #[serde(with = "duration_secs")]
    pub max_backoff: Duration,

    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay to wait after the `attempt`-th failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay_nanos = self.initial_backoff.as_nanos() as f64 * factor;
        if delay_nanos >= self.max_backoff.as_nanos() as f64 {
            return self.max_backoff;
        }
        Duration::from_nanos(delay_nanos as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default()
            .with_initial_backoff(Duration::from_millis(100))
            .with_max_backoff(Duration::from_millis(350));

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(30), Duration::from_millis(350));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::default().with_max_attempts(2);
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!RetryPolicy::none().should_retry(1));
    }
}
