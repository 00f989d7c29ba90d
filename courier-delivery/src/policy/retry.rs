//! Retry budget and backoff for queued records.

use std::time::Duration;

use courier_common::{EmailRecord, budget_exhausted};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for queued deliveries.
///
/// `max_retries` counts delivery attempts in total, including the first
/// synchronous one. A record is attempted again only while
/// `attempts < max_retries`; the failure that brings it to `max_retries`
/// marks it `failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts before giving up.
    ///
    /// Default: 5 attempts
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff (in seconds).
    ///
    /// The actual delay is calculated as: `base * 2^(attempts - 1)`
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::base_retry_delay_secs")]
    pub base_retry_delay_secs: u64,

    /// Maximum retry delay (in seconds).
    ///
    /// Default: 3600 seconds (1 hour)
    #[serde(default = "defaults::max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// Jitter factor for randomizing retry delays.
    ///
    /// The delay is randomized within ±`retry_jitter_factor`.
    ///
    /// Default: 0.2 (±20%)
    #[serde(default = "defaults::retry_jitter_factor")]
    pub retry_jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            base_retry_delay_secs: defaults::base_retry_delay_secs(),
            max_retry_delay_secs: defaults::max_retry_delay_secs(),
            retry_jitter_factor: defaults::retry_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// A policy with the given budget and no waiting between attempts.
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_retry_delay_secs: 0,
            max_retry_delay_secs: 0,
            retry_jitter_factor: 0.0,
        }
    }

    /// Whether `attempts` has used up the budget.
    #[must_use]
    pub const fn is_exhausted(&self, attempts: u32) -> bool {
        budget_exhausted(attempts, self.max_retries)
    }

    /// Whether `record` may be attempted again.
    #[must_use]
    pub const fn admits(&self, record: &EmailRecord) -> bool {
        record.is_retryable(self.max_retries)
    }

    /// Attempts left before the budget runs out.
    #[must_use]
    pub const fn remaining_attempts(&self, attempts: u32) -> u32 {
        self.max_retries.saturating_sub(attempts)
    }

    /// How long to wait before retrying a record that has failed `attempts`
    /// times.
    #[must_use]
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        backoff_delay(
            attempts,
            self.base_retry_delay_secs,
            self.max_retry_delay_secs,
            self.retry_jitter_factor,
        )
    }
}

/// Exponential backoff with jitter
///
/// # Formula
/// `delay = min(base * 2^(attempt - 1), max_delay) * (1 ± jitter)`
///
/// `attempt` is 1-indexed; 0 is treated like 1.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn backoff_delay(
    attempt: u32,
    base_delay_secs: u64,
    max_delay_secs: u64,
    jitter_factor: f64,
) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let delay = if exponent >= 63 {
        max_delay_secs
    } else {
        base_delay_secs
            .saturating_mul(1u64 << exponent)
            .min(max_delay_secs)
    };

    if delay == 0 || jitter_factor <= 0.0 {
        return Duration::from_secs(delay);
    }

    let jitter_range = (delay as f64) * jitter_factor;
    let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);

    Duration::from_secs_f64(((delay as f64) + jitter).max(0.0))
}

mod defaults {
    pub const fn max_retries() -> u32 {
        5
    }

    pub const fn base_retry_delay_secs() -> u64 {
        30
    }

    pub const fn max_retry_delay_secs() -> u64 {
        3600 // 1 hour
    }

    pub const fn retry_jitter_factor() -> f64 {
        0.2 // ±20%
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use courier_common::{DeliveryStatus, MailId, OutgoingMessage, Submission};

    use super::*;

    fn record(attempts: u32, status: DeliveryStatus) -> EmailRecord {
        let submission = Submission::new(
            MailId::new("m1").unwrap(),
            OutgoingMessage::new("a@x.com", "b@x.com", "Hi", "<p>hi</p>").unwrap(),
        );
        let mut record = EmailRecord::pending(&submission);
        record.attempts = attempts;
        record.status = status;
        record
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base_retry_delay_secs, 30);
        assert_eq!(policy.max_retry_delay_secs, 3600);
        assert!((policy.retry_jitter_factor - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_exhaustion_boundary() {
        let policy = RetryPolicy::default();

        assert!(!policy.is_exhausted(0));
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
        assert!(policy.is_exhausted(6));
        assert_eq!(policy.remaining_attempts(2), 3);
        assert_eq!(policy.remaining_attempts(9), 0);
    }

    #[test]
    fn test_admission() {
        let policy = RetryPolicy::default();

        assert!(policy.admits(&record(1, DeliveryStatus::Retry)));
        assert!(policy.admits(&record(4, DeliveryStatus::Retry)));
        assert!(policy.admits(&record(0, DeliveryStatus::Pending)));
        assert!(!policy.admits(&record(5, DeliveryStatus::Retry)));
        assert!(!policy.admits(&record(5, DeliveryStatus::Failed)));
        assert!(!policy.admits(&record(1, DeliveryStatus::Sent)));
    }

    #[test]
    fn test_exponential_backoff_without_jitter() {
        assert_eq!(backoff_delay(1, 60, 86400, 0.0), Duration::from_secs(60));
        assert_eq!(backoff_delay(2, 60, 86400, 0.0), Duration::from_secs(120));
        assert_eq!(backoff_delay(3, 60, 86400, 0.0), Duration::from_secs(240));
        assert_eq!(backoff_delay(20, 60, 86400, 0.0), Duration::from_secs(86400));
        assert_eq!(backoff_delay(200, 60, 86400, 0.0), Duration::from_secs(86400));
        assert_eq!(backoff_delay(0, 60, 86400, 0.0), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_with_jitter_stays_in_range() {
        for _ in 0..50 {
            let delay = backoff_delay(2, 60, 86400, 0.2).as_secs_f64();
            assert!((95.9..=144.1).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_immediate_policy_has_no_delay() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.retry_delay(2), Duration::ZERO);
        assert!(policy.is_exhausted(3));
    }
}
