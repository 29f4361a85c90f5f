// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! Retry and polling cadence policies.
//!
//! Separated from the call sites that use them (capture worker,
//! dispatcher) so the backoff curve can be swapped or unit-tested in
//! isolation.

use std::time::Duration;

/// Decides how long to wait before retrying a failed, retryable
/// device operation, and when to give up.
pub trait RetryPolicy: Send + Sync {
    /// Delay before attempt number `attempt` (0-based; `attempt == 0`
    /// is the delay before the *first* retry, after the initial try
    /// already failed).
    fn delay(&self, attempt: u32) -> Duration;

    /// Whether to try again after `attempt` failures so far.
    fn should_retry(&self, attempt: u32) -> bool;
}

/// Doubles the delay each attempt, capped, with a fixed retry budget.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map(|d| d.min(self.max))
            .unwrap_or(self.max)
    }

    fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Decides how often the dispatcher re-examines the pending queues.
///
/// A fixed interval works but wastes wake-ups when the head of every
/// queue is hours away; an adaptive policy shortens the tick as the
/// next scheduled start approaches so the dispatcher still fires
/// within its tolerance window without busy-polling overnight.
pub trait PollingPolicy: Send + Sync {
    /// Next wait, given the time remaining until the nearest known
    /// deadline (`None` if no job is pending anywhere).
    fn next_interval(&self, time_to_next_deadline: Option<Duration>) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct AdaptivePolling {
    pub idle_interval: Duration,
    pub near_interval: Duration,
    pub near_threshold: Duration,
}

impl Default for AdaptivePolling {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(30),
            near_interval: Duration::from_secs(1),
            near_threshold: Duration::from_secs(60),
        }
    }
}

impl PollingPolicy for AdaptivePolling {
    fn next_interval(&self, time_to_next_deadline: Option<Duration>) -> Duration {
        match time_to_next_deadline {
            Some(remaining) if remaining <= self.near_threshold => self.near_interval,
            _ => self.idle_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            max_attempts: 10,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(10), Duration::from_secs(1));
    }

    #[test]
    fn exponential_backoff_respects_attempt_budget() {
        let policy = ExponentialBackoff {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn adaptive_polling_tightens_near_deadline() {
        let policy = AdaptivePolling::default();
        assert_eq!(policy.next_interval(None), policy.idle_interval);
        assert_eq!(
            policy.next_interval(Some(Duration::from_secs(5))),
            policy.near_interval
        );
        assert_eq!(
            policy.next_interval(Some(Duration::from_secs(3600))),
            policy.idle_interval
        );
    }
}
