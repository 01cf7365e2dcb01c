// Telemetry initialization
//
// Console logging through tracing-subscriber, optionally teeing events into
// a LogForwarder so they reach the hub.

use std::sync::Arc;

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::logs::{LogForwarder, LogForwardingLayer};

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// `json` selects JSON; anything else is text
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Configuration for logging
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to startup logs
    pub service_name: String,
    /// Log filter (e.g., "info", "schemaflow_core=debug")
    pub log_filter: Option<String>,
    pub format: LogFormat,
    /// Whether to enable console logging
    pub enable_console: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "schemaflow".to_string(),
            log_filter: None,
            format: LogFormat::Text,
            enable_console: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SCHEMAFLOW_SERVICE_NAME`: Service name (default: "schemaflow")
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter (default: "info")
    /// - `SCHEMAFLOW_LOG_FORMAT`: `text` or `json` (default: text)
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("SCHEMAFLOW_SERVICE_NAME")
                .unwrap_or_else(|_| "schemaflow".to_string()),
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            format: std::env::var("SCHEMAFLOW_LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            enable_console: true,
        }
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

/// Install the global subscriber. Console output goes to stderr.
///
/// With a forwarder, events at or above its layer's level are also buffered
/// for the hub. Fails if a global subscriber is already set.
///
/// # Example
///
/// ```ignore
/// use schemaflow_coordinator::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     init_telemetry(TelemetryConfig::from_env(), None).ok();
///     // ... your application code
/// }
/// ```
pub fn init_telemetry(
    config: TelemetryConfig,
    forwarder: Option<Arc<LogForwarder>>,
) -> Result<(), TryInitError> {
    let console_layer = config.enable_console.then(|| match config.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(config.filter())
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(config.filter())
            .boxed(),
    });
    let forwarding = forwarder.is_some();
    let forward_layer = forwarder.map(LogForwardingLayer::new);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(forward_layer)
        .try_init()?;

    tracing::debug!(
        service = %config.service_name,
        format = ?config.format,
        forwarding,
        "telemetry initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Text);
    }

    #[test]
    fn test_default_filter_is_info() {
        assert_eq!(TelemetryConfig::default().filter().to_string(), "info");
    }
}
