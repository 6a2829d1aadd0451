//! Retry policy for redelivering failed invoice jobs.
//!
//! The policy is owned by the queue: workers only report whether a failure
//! was transient or permanent, and the queue decides when (and whether) the
//! job runs again.
//!
//! # Example
//!
//! ```
//! use orderdesk_core::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new()
//!     .with_max_attempts(5)
//!     .with_initial_delay(Duration::from_secs(1))
//!     .with_jitter(false);
//!
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
//! assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
//! assert!(policy.should_retry(4));
//! assert!(!policy.should_retry(5));
//! ```

use std::time::Duration;

/// Exponential backoff with optional jitter and an attempt ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first delivery)
    max_attempts: u32,

    /// Delay before the first retry
    initial_delay: Duration,

    /// Cap for the exponential backoff
    max_delay: Duration,

    /// Multiplier applied per retry (2.0 = double each time)
    multiplier: f64,

    /// Scale each delay by a random factor in `[0.5, 1.0]`
    jitter: bool,
}

impl RetryPolicy {
    /// Create a retry policy with default settings.
    ///
    /// Defaults:
    /// - `max_attempts`: 5
    /// - `initial_delay`: 1 second
    /// - `max_delay`: 60 seconds
    /// - `multiplier`: 2.0
    /// - `jitter`: enabled
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Set maximum attempts. Values below 1 are treated as 1.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = if attempts == 0 { 1 } else { attempts };
        self
    }

    /// Set delay before the first retry.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay between retries.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (0-indexed).
    ///
    /// `min(initial_delay * multiplier^retry, max_delay)`, scaled by a
    /// random factor in `[0.5, 1.0]` when jitter is on.
    #[must_use]
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        use rand::Rng;

        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let base_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped_secs = base_secs.min(self.max_delay.as_secs_f64()).max(0.0);

        let final_secs = if self.jitter {
            capped_secs * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped_secs
        };

        Duration::try_from_secs_f64(final_secs).unwrap_or(self.max_delay)
    }

    /// Delay after the `attempts`-th failed delivery (1-indexed).
    #[must_use]
    pub fn backoff_after(&self, attempts: u32) -> Duration {
        self.delay_for_attempt(attempts.saturating_sub(1))
    }

    /// Maximum number of attempts.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a job that has been delivered `attempts` times may run again.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}
