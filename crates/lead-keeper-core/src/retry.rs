//! # Retry Policy
//!
//! Retry budget and backoff schedule for webhook processing.
//!
//! The schedule is data: an ordered list of delays consulted by whoever
//! re-invokes the pipeline. The pipeline itself never sleeps.

use crate::ValidationError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the scheduler should do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-run the pipeline after this delay
    RetryAfter(Duration),
    /// Budget used up; record the failure and stop
    Exhausted,
}

/// Retry budget with a data-driven backoff schedule
///
/// # Examples
///
/// ```rust
/// use lead_keeper_core::retry::{RetryDecision, RetryPolicy};
/// use std::time::Duration;
///
/// // Default policy: 5 attempts, then 1, 5, 15, 60 minutes between them
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.decide(1), RetryDecision::RetryAfter(Duration::from_secs(60)));
/// assert_eq!(policy.decide(5), RetryDecision::Exhausted);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first
    pub max_attempts: u32,

    /// Delay before attempt `n + 1`, indexed by `n - 1`; the last entry repeats
    pub backoff_seconds: Vec<u64>,

    /// Jitter range as a fraction of the delay (0.0 disables jitter)
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_seconds: vec![60, 5 * 60, 15 * 60, 60 * 60],
            jitter_percent: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy from an explicit schedule
    pub fn new(max_attempts: u32, backoff: &[Duration]) -> Self {
        Self {
            max_attempts,
            backoff_seconds: backoff.iter().map(Duration::as_secs).collect(),
            jitter_percent: 0.0,
        }
    }

    /// Set the jitter fraction (clamped to 0.0..=1.0)
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Decide what happens after `attempts_made` failed attempts
    pub fn decide(&self, attempts_made: u32) -> RetryDecision {
        if attempts_made >= self.max_attempts {
            return RetryDecision::Exhausted;
        }
        RetryDecision::RetryAfter(self.delay_after(attempts_made))
    }

    /// Whether another attempt is allowed after `attempts_made`
    pub fn can_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay following the given (1-based) attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let seconds = self
            .backoff_seconds
            .get(index)
            .or_else(|| self.backoff_seconds.last())
            .copied()
            .unwrap_or(0);
        let base = Duration::from_secs(seconds);

        if self.jitter_percent > 0.0 && !base.is_zero() {
            let factor = rand::rng()
                .random_range((1.0 - self.jitter_percent)..=(1.0 + self.jitter_percent));
            base.mul_f64(factor)
        } else {
            base
        }
    }

    /// Check the policy is usable
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::OutOfRange {
                field: "retry.max_attempts".to_string(),
                min: 1,
                max: i64::from(u32::MAX),
            });
        }

        if self.backoff_seconds.is_empty() {
            return Err(ValidationError::Required {
                field: "retry.backoff_seconds".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_percent) {
            return Err(ValidationError::InvalidFormat {
                field: "retry.jitter_percent".to_string(),
                message: "must be between 0.0 and 1.0".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
