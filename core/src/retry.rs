//! Retry policy with exponential backoff.
//!
//! Destinations carry a [`RetryPolicy`] describing how often and how fast a
//! failed delivery is retried. The policy is plain data (it lives inside
//! intake definitions and is deserialized from JSON); the delivery worker
//! turns it into sleeps.
//!
//! # Example
//!
//! ```
//! use intake_core::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_attempts(4)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(1))
//!     .multiplier(3.0)
//!     .build();
//!
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(300));
//! assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(1));
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 5
/// - `initial_delay_ms`: 1000
/// - `backoff_multiplier`: 2.0
/// - `max_delay_ms`: 60000
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            backoff_multiplier: DEFAULT_MULTIPLIER,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Calculate the delay after the failed attempt with zero-based index `attempt`.
    ///
    /// Uses exponential backoff: `initial_delay * multiplier ^ attempt`,
    /// capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_delay = Duration::from_millis(self.max_delay_ms);
        if attempt == 0 {
            return Duration::from_millis(self.initial_delay_ms).min(max_delay);
        }

        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        if !delay_ms.is_finite() || delay_ms >= self.max_delay_ms as f64 {
            return max_delay;
        }

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    #[must_use]
    pub const fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set the total number of attempts.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the delay after the first failure.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            initial_delay_ms: self
                .initial_delay
                .map_or(DEFAULT_INITIAL_DELAY_MS, |d| d.as_millis() as u64),
            backoff_multiplier: self.multiplier.unwrap_or(DEFAULT_MULTIPLIER),
            max_delay_ms: self
                .max_delay
                .map_or(DEFAULT_MAX_DELAY_MS, |d| d.as_millis() as u64),
        }
    }
}
