//! Exponential backoff retry policy with jitter.
//!
//! Decides whether a failed delivery reschedules or becomes a terminal
//! failure, and when the next attempt is due. Delays double per
//! accumulated failure and are randomized to spread load across
//! destinations recovering at the same time.

use std::time::Duration;

use chrono::{DateTime, Utc};
use fanout_core::models::QueuedNotification;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy configuration for notification delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Maximum delay between attempts.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) to add randomness.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            jitter_factor: 0.25,
        }
    }
}

/// Result of a retry decision for one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reschedule the notification for the given time.
    Retry {
        /// When the next delivery attempt should be made
        next_attempt_at: DateTime<Utc>,
    },
    /// Retry budget exhausted; the notification fails terminally.
    GiveUp {
        /// Reason why delivery should not be retried
        reason: String,
    },
}

impl RetryPolicy {
    /// Policy with no jitter, for deterministic scheduling tests.
    pub fn without_jitter() -> Self {
        Self { jitter_factor: 0.0, ..Self::default() }
    }

    /// Decides whether a failed notification retries or gives up.
    ///
    /// `notification.retry_count` counts failures before this attempt;
    /// the failure being recorded brings it to `retry_count + 1`. A
    /// retry is scheduled only while that incremented count stays below
    /// `max_retries`, so a row never sees more than `max_retries`
    /// delivery attempts.
    pub fn decide(
        &self,
        notification: &QueuedNotification,
        failed_at: DateTime<Utc>,
    ) -> RetryDecision {
        let failures = notification.retry_count.saturating_add(1);
        if failures >= notification.max_retries {
            return RetryDecision::GiveUp {
                reason: format!(
                    "retry budget exhausted ({failures} of {})",
                    notification.max_retries
                ),
            };
        }

        let delay = self.backoff_delay(notification.retry_count);
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp { reason: "retry delay out of range".to_string() };
        };
        RetryDecision::Retry { next_attempt_at: failed_at + chrono_delay }
    }

    /// Delay before the attempt following `retry_count` prior
    /// failures: `base * 2^retry_count`, capped, then jittered.
    pub fn backoff_delay(&self, retry_count: i32) -> Duration {
        let exponent = u32::try_from(retry_count).unwrap_or(0).min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let raw = self.base_delay.saturating_mul(multiplier);
        let capped = std::cmp::min(raw, self.max_delay);
        std::cmp::min(apply_jitter(capped, self.jitter_factor), self.max_delay)
    }
}

/// Randomizes a delay by ±jitter_factor. With jitter_factor=0.25 a 60s
/// delay lands between 45s and 75s.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped = jitter_factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped;
    let offset = rng.random_range(-jitter_range..=jitter_range);
    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}
