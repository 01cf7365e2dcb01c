//! Reconnect backoff
//!
//! Delays grow by `multiplier` after every failed connection attempt, capped
//! at `max_delay`, and return to `initial_delay` once a connection succeeds.

use std::time::Duration;

use schemaflow_core::duration_millis;
use serde::{Deserialize, Serialize};

/// Reconnect policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Ceiling for the delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Growth factor applied after each failure (values below 1.0 act as 1.0)
    pub multiplier: f64,

    /// Consecutive failures allowed before giving up (0 = unlimited)
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

/// Backoff state for one reconnect loop
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: ReconnectConfig,
    current: Duration,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let current = config.initial_delay.min(config.max_delay);
        Self {
            config,
            current,
            attempts: 0,
        }
    }

    /// Record a failure and return the delay to wait before retrying, or
    /// `None` once the attempt ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempts += 1;

        let delay = self.current;
        self.increase_backoff();
        Some(delay)
    }

    /// Back to the initial delay after a successful connection
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay.min(self.config.max_delay);
        self.attempts = 0;
    }

    /// Delay the next failure will wait
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// Consecutive failures since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts
    }

    fn increase_backoff(&mut self) {
        let multiplier = self.config.multiplier.max(1.0);
        let next = self.current.as_nanos() as f64 * multiplier;
        self.current = if next >= self.config.max_delay.as_nanos() as f64 {
            self.config.max_delay
        } else {
            Duration::from_nanos(next as u64)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReconnectConfig {
        ReconnectConfig::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1000))
            .with_multiplier(2.0)
    }

    #[test]
    fn test_delays_grow_to_ceiling() {
        let mut backoff = ReconnectBackoff::new(config());
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay().unwrap()).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1000),
                Duration::from_millis(1000),
            ]
        );
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_reset_after_success() {
        let mut backoff = ReconnectBackoff::new(config());
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_attempt_ceiling() {
        let mut backoff = ReconnectBackoff::new(config().with_max_attempts(2));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.exhausted());
        assert_eq!(backoff.next_delay(), None);

        backoff.reset();
        assert!(backoff.next_delay().is_some());
    }

    #[test]
    fn test_multiplier_below_one_never_shrinks() {
        let mut backoff = ReconnectBackoff::new(config().with_multiplier(0.5));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_config_serializes_millis() {
        let json = serde_json::to_value(config()).unwrap();
        assert_eq!(json["initial_delay"], 100);
        assert_eq!(json["max_delay"], 1000);
    }
}
