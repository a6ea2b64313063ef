//! Backoff policy: decides the delay after a failed cycle.

use std::time::Duration;

use crate::config::BackoffSettings;

/// Exponential backoff with a cap.
///
/// Example with base=120s, max=900s:
/// - failure 1: 120s
/// - failure 2: 240s
/// - failure 3: 480s
/// - failure 4: 900s (960s capped)
/// - failure 5+: 900s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Delay for the `failures`-th consecutive failure (1-indexed):
    /// `min(base * 2^(failures - 1), max)`. `failures = 0` yields `base`.
    pub fn next_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    pub fn initial_state(&self) -> BackoffState {
        BackoffState {
            consecutive_failures: 0,
            current_delay: self.base_delay,
        }
    }
}

impl From<BackoffSettings> for BackoffPolicy {
    fn from(settings: BackoffSettings) -> Self {
        Self::new(settings.base, settings.max)
    }
}

/// Failure streak bookkeeping, owned by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    pub consecutive_failures: u32,
    /// What the next failure will sleep for.
    pub current_delay: Duration,
}

impl BackoffState {
    /// A success resets the streak.
    pub fn record_success(&mut self, policy: &BackoffPolicy) {
        *self = policy.initial_state();
    }

    /// Register a failure and return how long to sleep before the next cycle.
    pub fn record_failure(&mut self, policy: &BackoffPolicy) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let delay = policy.next_delay(self.consecutive_failures);
        self.current_delay = policy.next_delay(self.consecutive_failures.saturating_add(1));
        delay
    }
}
