//! Linear reconnect backoff bounded by a retry ceiling.
//!
//! The delay before reconnect attempt `n` (1-indexed) is `base × n`. There is
//! no jitter and no delay cap; [`BackoffPolicy::max_retries`] bounds how many
//! automatic attempts a single unclean closure can trigger.

use std::time::Duration;

pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay unit multiplied by the attempt number.
    pub base: Duration,
    /// Highest attempt number that may still be scheduled automatically.
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt`.
    ///
    /// Attempt `0` is treated as `1`; the caller counts attempts from 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt.max(1))
    }

    /// Whether another automatic attempt is allowed after `attempt` have been made.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}
