// Coordinator configuration
//
// Loaded from SCHEMAFLOW_* environment variables. Unset variables fall back
// to defaults; set-but-unparseable numbers are reported instead of ignored.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use schemaflow_core::duration_millis;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backoff::ReconnectConfig;
use crate::protocol::PROTOCOL_VERSION;
use crate::transport::ServiceIdentity;

/// Default hub address
pub const DEFAULT_HUB_ADDR: &str = "127.0.0.1:7400";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Hub address (`host:port`)
    pub hub_addr: String,

    pub service_name: String,

    /// Instance id, unique per process
    pub service_id: String,

    /// Capabilities announced at registration
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Version announced at registration
    pub version: String,

    /// Interval between heartbeat pings (0 disables)
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    /// Outbound queue capacity
    pub send_queue_capacity: usize,

    /// Timeout for dialing the hub
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    pub reconnect: ReconnectConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            hub_addr: DEFAULT_HUB_ADDR.to_string(),
            service_name: "schemaflow".to_string(),
            service_id: format!("schemaflow-{}", Uuid::now_v7()),
            capabilities: Vec::new(),
            version: PROTOCOL_VERSION.to_string(),
            heartbeat_interval: Duration::from_secs(30),
            send_queue_capacity: 256,
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SCHEMAFLOW_HUB_ADDR`: hub address (default: 127.0.0.1:7400)
    /// - `SCHEMAFLOW_SERVICE_NAME`: service name (default: schemaflow)
    /// - `SCHEMAFLOW_SERVICE_ID`: instance id (default: schemaflow-<uuid>)
    /// - `SCHEMAFLOW_CAPABILITIES`: comma-separated capability list
    /// - `SCHEMAFLOW_HEARTBEAT_INTERVAL_MS`: heartbeat interval (default: 30000)
    /// - `SCHEMAFLOW_SEND_QUEUE_CAPACITY`: outbound queue size (default: 256)
    /// - `SCHEMAFLOW_CONNECT_TIMEOUT_MS`: dial timeout (default: 10000)
    /// - `SCHEMAFLOW_RECONNECT_INITIAL_MS`: first retry delay (default: 1000)
    /// - `SCHEMAFLOW_RECONNECT_MAX_MS`: retry delay ceiling (default: 60000)
    /// - `SCHEMAFLOW_RECONNECT_MULTIPLIER`: delay growth factor (default: 2.0)
    /// - `SCHEMAFLOW_RECONNECT_MAX_ATTEMPTS`: retry ceiling, 0 = unlimited (default: 0)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let service_name =
            env::var("SCHEMAFLOW_SERVICE_NAME").unwrap_or(defaults.service_name);
        let capabilities = env::var("SCHEMAFLOW_CAPABILITIES")
            .map(|v| parse_list(&v))
            .unwrap_or_default();

        let reconnect = ReconnectConfig {
            initial_delay: parse_millis("SCHEMAFLOW_RECONNECT_INITIAL_MS")?
                .unwrap_or(defaults.reconnect.initial_delay),
            max_delay: parse_millis("SCHEMAFLOW_RECONNECT_MAX_MS")?
                .unwrap_or(defaults.reconnect.max_delay),
            multiplier: parse_var("SCHEMAFLOW_RECONNECT_MULTIPLIER")?
                .unwrap_or(defaults.reconnect.multiplier),
            max_attempts: parse_var("SCHEMAFLOW_RECONNECT_MAX_ATTEMPTS")?
                .unwrap_or(defaults.reconnect.max_attempts),
        };

        Ok(Self {
            hub_addr: env::var("SCHEMAFLOW_HUB_ADDR").unwrap_or(defaults.hub_addr),
            service_id: env::var("SCHEMAFLOW_SERVICE_ID").unwrap_or(defaults.service_id),
            service_name,
            capabilities,
            version: defaults.version,
            heartbeat_interval: parse_millis("SCHEMAFLOW_HEARTBEAT_INTERVAL_MS")?
                .unwrap_or(defaults.heartbeat_interval),
            send_queue_capacity: parse_var("SCHEMAFLOW_SEND_QUEUE_CAPACITY")?
                .unwrap_or(defaults.send_queue_capacity),
            connect_timeout: parse_millis("SCHEMAFLOW_CONNECT_TIMEOUT_MS")?
                .unwrap_or(defaults.connect_timeout),
            reconnect,
        })
    }

    pub fn with_hub_addr(mut self, addr: impl Into<String>) -> Self {
        self.hub_addr = addr.into();
        self
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_service_id(mut self, id: impl Into<String>) -> Self {
        self.service_id = id.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Identity sent in the connection handshake
    pub fn identity(&self) -> ServiceIdentity {
        ServiceIdentity::new(self.service_name.clone(), self.service_id.clone())
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                var,
                value,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn parse_millis(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_var::<u64>(var)?.map(Duration::from_millis))
}
