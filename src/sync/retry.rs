//! Backoff and retry ceiling for failed replays.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exponential backoff keyed on an operation's retry count.
///
/// After the n-th failure the operation waits `base * 2^(n-1)`, capped at
/// `max_delay`. A zero base disables backoff. When `max_retries` is set, the
/// failure that reaches it dead-letters the operation.
///
/// The default retries on every pass and never gives up; backoff and the
/// ceiling are opt-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay after the first failure, in seconds.
    pub base_delay_secs: u64,
    /// Upper bound on any delay, in seconds.
    pub max_delay_secs: u64,
    /// Failures allowed before dead-lettering; `None` retries forever.
    pub max_retries: Option<u32>,
}

const DEFAULT_MAX_DELAY_SECS: u64 = 300;

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RetryPolicy {
    /// Retry on every pass, forever.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            base_delay_secs: 0,
            max_delay_secs: DEFAULT_MAX_DELAY_SECS,
            max_retries: None,
        }
    }

    /// Back off exponentially from `base_delay_secs`, dead-lettering after
    /// `max_retries` failures.
    #[must_use]
    pub const fn exponential(base_delay_secs: u64, max_retries: u32) -> Self {
        Self {
            base_delay_secs,
            max_delay_secs: DEFAULT_MAX_DELAY_SECS,
            max_retries: Some(max_retries),
        }
    }

    /// Delay to wait after an operation has failed `retry_count` times.
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if self.base_delay_secs == 0 || retry_count == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u64.saturating_pow(retry_count - 1);
        let secs = self
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs.max(self.base_delay_secs));
        Duration::from_secs(secs)
    }

    /// When an operation that has failed `retry_count` times may run again.
    #[must_use]
    pub fn next_attempt_at(&self, retry_count: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let delay = self.delay_for(retry_count);
        if delay.is_zero() {
            return None;
        }
        chrono::Duration::from_std(delay).ok().map(|d| now + d)
    }

    /// Whether `retry_count` failures exhaust the budget.
    #[must_use]
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        self.max_retries.is_some_and(|max| retry_count >= max)
    }
}
