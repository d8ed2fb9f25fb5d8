//! Exponential backoff and the retry policy for failed deliveries.
//!
//! One formula drives every wait in the processor: idle polling, recovery
//! from queue faults and the delay before a failed task is requeued. Each
//! use has its own base and ceiling, all collected in [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum number of delivery attempts, initial attempt included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 7;

/// Computes `clamp(base^n, 1, max_seconds)` seconds.
///
/// Arithmetic saturates, so large exponents land on the ceiling instead of
/// overflowing.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use gridlet_delivery::retry::backoff;
///
/// assert_eq!(backoff(1, 4, 600), Duration::from_secs(4));
/// assert_eq!(backoff(3, 4, 600), Duration::from_secs(64));
/// assert_eq!(backoff(9, 4, 600), Duration::from_secs(600));
/// ```
pub fn backoff(n: u32, base: u64, max_seconds: u64) -> Duration {
    let seconds = base.saturating_pow(n).min(max_seconds).max(1);
    Duration::from_millis(seconds.saturating_mul(1000))
}

/// Backoff parameters for every wait the processor performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts, initial attempt included.
    pub max_attempts: u32,

    /// Base of the delay before requeueing a failed task.
    pub retry_base: u64,

    /// Ceiling of the requeue delay.
    pub retry_max_delay: Duration,

    /// Base of the delay after polling an empty queue.
    pub idle_base: u64,

    /// Ceiling of the idle delay.
    pub idle_max_delay: Duration,

    /// Base of the delay after a queue fault.
    pub error_base: u64,

    /// Ceiling of the queue fault delay.
    pub error_max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base: 4,
            retry_max_delay: Duration::from_secs(600),
            idle_base: 2,
            idle_max_delay: Duration::from_secs(20),
            error_base: 4,
            error_max_delay: Duration::from_secs(600),
        }
    }
}

/// Outcome of [`RetryPolicy::decide`] for a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue the next attempt after `delay`.
    Retry {
        /// How long the retry unit waits before requeueing
        delay: Duration,
    },
    /// Stop retrying and deadletter.
    GiveUp {
        /// Reason recorded with the deadletter
        reason: String,
    },
}

impl RetryPolicy {
    /// Decides what happens after a transport failure of `attempt`.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exhausted", self.max_attempts),
            };
        }

        RetryDecision::Retry { delay: self.retry_delay(attempt) }
    }

    /// Delay before requeueing after the failure of `attempt`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        backoff(attempt, self.retry_base, self.retry_max_delay.as_secs())
    }

    /// Delay after `consecutive` empty polls.
    pub fn idle_delay(&self, consecutive: u32) -> Duration {
        backoff(consecutive, self.idle_base, self.idle_max_delay.as_secs())
    }

    /// Delay after `consecutive` queue faults.
    pub fn error_delay(&self, consecutive: u32) -> Duration {
        backoff(consecutive, self.error_base, self.error_max_delay.as_secs())
    }
}
