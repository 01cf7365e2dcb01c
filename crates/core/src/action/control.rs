//! Control metadata carried by scheduled actions
//!
//! Control metadata is declarative: the expander fills in defaults, but
//! enforcement of retries and singleton execution belongs to whatever
//! runtime the action is handed to.

use serde::{Deserialize, Serialize};

/// Backoff strategy between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Delay doubles on each attempt
    #[default]
    Exponential,
    /// Delay grows by the initial interval on each attempt
    Linear,
    /// Same delay for every attempt
    Fixed,
    /// Retry immediately
    None,
}

impl std::fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exponential => write!(f, "exponential"),
            Self::Linear => write!(f, "linear"),
            Self::Fixed => write!(f, "fixed"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Execution control for a scheduled action
///
/// `enabled` and `singleton` are tri-state on the wire so that an explicit
/// `false` can be told apart from "not specified".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlMetadata {
    /// Whether the action should run at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Number of retries after the first attempt
    #[serde(default)]
    pub retry_count: u32,

    /// Delay strategy between retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_backoff: Option<BackoffStrategy>,

    /// At most one concurrent execution of this action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singleton: Option<bool>,

    /// Routing URL for HTTP-style executors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// HTTP method used with `url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl ControlMetadata {
    /// Create empty control metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Enabled unless explicitly disabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Singleton unless explicitly turned off
    pub fn is_singleton(&self) -> bool {
        self.singleton.unwrap_or(true)
    }

    /// Effective backoff strategy
    pub fn backoff(&self) -> BackoffStrategy {
        self.retry_backoff.unwrap_or_default()
    }

    /// Set the enabled flag
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Set the retry count
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Set the backoff strategy
    pub fn with_retry_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.retry_backoff = Some(strategy);
        self
    }

    /// Set the singleton flag
    pub fn with_singleton(mut self, singleton: bool) -> Self {
        self.singleton = Some(singleton);
        self
    }

    /// Set explicit routing
    pub fn with_route(mut self, url: impl Into<String>, method: Option<&str>) -> Self {
        self.url = Some(url.into());
        self.method = method.map(|m| m.to_uppercase());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_flags_default_on() {
        let control = ControlMetadata::new();
        assert!(control.is_enabled());
        assert!(control.is_singleton());
        assert_eq!(control.backoff(), BackoffStrategy::Exponential);
    }

    #[test]
    fn test_explicit_false_survives_round_trip() {
        let control = ControlMetadata::new().with_enabled(false);
        let json = serde_json::to_value(&control).unwrap();
        assert_eq!(json["enabled"], false);

        let parsed: ControlMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.enabled, Some(false));
        assert!(!parsed.is_enabled());
    }

    #[test]
    fn test_camel_case_fields() {
        let parsed: ControlMetadata = serde_json::from_str(
            r#"{"retryCount": 3, "retryBackoff": "linear", "url": "https://x", "method": "PUT"}"#,
        )
        .unwrap();

        assert_eq!(parsed.retry_count, 3);
        assert_eq!(parsed.backoff(), BackoffStrategy::Linear);
        assert_eq!(parsed.method.as_deref(), Some("PUT"));
        assert_eq!(parsed.enabled, None);
    }
}
