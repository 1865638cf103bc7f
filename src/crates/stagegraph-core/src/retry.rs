//! Retry policy for stage invocations
//!
//! A stage registered with a [`RetryPolicy`] is re-invoked when an attempt
//! ends with nothing but retryable errors, that is a domain error sent through
//! [`Context::send_error`](crate::Context::send_error) or a timeout. An attempt
//! that emitted a downstream message or a terminal output is never repeated,
//! so retrying cannot duplicate work further down the graph. Contract
//! violations are handler defects and are never retried.
//!
//! Delays grow exponentially:
//!
//! ```text
//! delay(n) = min(initial_interval * backoff_factor^n, max_interval)   (n = 0, 1, ...)
//! ```
//!
//! With `jitter` enabled the delay is scaled by a random factor in `0.5..=1.5`.
//! No delay exceeds [`MAX_RETRY_DELAY`], whatever the configured intervals.
//!
//! ```rust
//! use stagegraph_core::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(4)
//!     .with_initial_interval(0.1)
//!     .with_backoff_factor(2.0)
//!     .with_jitter(false);
//!
//! assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
//! assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
//! assert!(policy.should_retry(3));
//! assert!(!policy.should_retry(4));
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on any single retry delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for re-invoking a failed stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Initial interval between retries in seconds
    pub initial_interval: f64,

    /// Multiplier for the interval after each retry
    pub backoff_factor: f64,

    /// Maximum interval between retries in seconds
    pub max_interval: f64,

    /// Whether to add random jitter to intervals
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a new retry policy with the given max attempts
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 30.0,
            jitter: true,
        }
    }

    /// Set the initial interval between retries
    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    /// Set the backoff factor
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the maximum interval between retries
    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after failed attempt number `retry` (0-indexed)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let base_delay = self.initial_interval * self.backoff_factor.powi(retry as i32);
        let capped_delay = base_delay.min(self.max_interval).max(0.0);

        let final_delay = if self.jitter {
            let mut rng = rand::thread_rng();
            capped_delay * rng.gen_range(0.5..=1.5)
        } else {
            capped_delay
        };

        Duration::try_from_secs_f64(final_delay)
            .map(|delay| delay.min(MAX_RETRY_DELAY))
            .unwrap_or(MAX_RETRY_DELAY)
    }

    /// Whether `attempts_made` attempts still leave room for another one
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
