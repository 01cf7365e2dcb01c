//! Retry policy
//!
//! The policy describes how a runtime should retry a failed action. The
//! executor registry does not apply it; it is exposed so that runtimes
//! built on this crate share one interpretation of control metadata.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::action::{BackoffStrategy, ControlMetadata};
use crate::duration_millis;

/// Retry configuration for an action
///
/// # Example
///
/// ```
/// use schemaflow_core::action::{BackoffStrategy, ControlMetadata};
/// use schemaflow_core::RetryPolicy;
/// use std::time::Duration;
///
/// let control = ControlMetadata::new()
///     .with_retry_count(3)
///     .with_retry_backoff(BackoffStrategy::Linear);
/// let policy = RetryPolicy::from_control(&control).with_jitter(0.0);
///
/// assert_eq!(policy.max_attempts, 4);
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Base delay between attempts
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// How the delay grows between attempts
    pub strategy: BackoffStrategy,

    /// Jitter factor (0.0-1.0); 0.1 means ±10%
    pub jitter: f64,

    /// Error codes that must not be retried
    #[serde(default)]
    pub non_retryable_codes: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
            non_retryable_codes: vec![],
        }
    }
}

impl RetryPolicy {
    /// Policy described by an action's control metadata
    ///
    /// `retryCount` is the number of retries, so attempts are one more.
    pub fn from_control(control: &ControlMetadata) -> Self {
        Self {
            max_attempts: control.retry_count.saturating_add(1),
            strategy: control.backoff(),
            ..Self::default()
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            strategy: BackoffStrategy::None,
            jitter: 0.0,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the jitter factor (clamped to 0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_non_retryable_code(mut self, code: impl Into<String>) -> Self {
        self.non_retryable_codes.push(code.into());
        self
    }

    /// Delay before the given attempt (1-based); the first attempt has none
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry = (attempt - 1) as f64;
        let initial = self.initial_interval.as_secs_f64();
        let base = match self.strategy {
            BackoffStrategy::Exponential => initial * 2f64.powf(retry - 1.0),
            BackoffStrategy::Linear => initial * retry,
            BackoffStrategy::Fixed => initial,
            BackoffStrategy::None => 0.0,
        };
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let range = capped * self.jitter;
            (capped + rand::thread_rng().gen_range(-range..range)).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Whether an error with this code may be retried
    pub fn should_retry(&self, code: Option<&str>) -> bool {
        match code {
            Some(code) => !self.non_retryable_codes.iter().any(|c| c == code),
            None => true,
        }
    }

    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}
