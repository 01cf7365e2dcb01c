//! Hub wire protocol
//!
//! Every frame is one JSON envelope `{id, type, workflow_id?, timestamp,
//! payload}`. The payload shape is determined by `type` alone; unknown types
//! decode into [`MessageType::Other`] and are carried through unchanged.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::phase::{Phase, PhaseState};

/// Protocol version announced at registration
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Message type discriminant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Register,
    Registered,
    PhaseChanged,
    Checkpoint,
    Error,
    Progress,
    Status,
    StatusResponse,
    Pause,
    Resume,
    Cancel,
    Ping,
    Pong,
    Logs,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Register => "register",
            MessageType::Registered => "registered",
            MessageType::PhaseChanged => "phase_changed",
            MessageType::Checkpoint => "checkpoint",
            MessageType::Error => "error",
            MessageType::Progress => "progress",
            MessageType::Status => "status",
            MessageType::StatusResponse => "status_response",
            MessageType::Pause => "pause",
            MessageType::Resume => "resume",
            MessageType::Cancel => "cancel",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Logs => "logs",
            MessageType::Other(other) => other,
        }
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "register" => MessageType::Register,
            "registered" => MessageType::Registered,
            "phase_changed" => MessageType::PhaseChanged,
            "checkpoint" => MessageType::Checkpoint,
            "error" => MessageType::Error,
            "progress" => MessageType::Progress,
            "status" => MessageType::Status,
            "status_response" => MessageType::StatusResponse,
            "pause" => MessageType::Pause,
            "resume" => MessageType::Resume,
            "cancel" => MessageType::Cancel,
            "ping" => MessageType::Ping,
            "pong" => MessageType::Pong,
            "logs" => MessageType::Logs,
            _ => MessageType::Other(value),
        }
    }
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        MessageType::from(value.to_string())
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsMessage {
    /// Correlation identifier; replies reuse the request's id
    pub id: String,

    #[serde(rename = "type")]
    pub message_type: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub payload: Value,
}

impl WsMessage {
    /// New message with a fresh correlation id
    pub fn new(message_type: impl Into<MessageType>, payload: Value) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            message_type: message_type.into(),
            workflow_id: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// New message with a typed payload
    pub fn with_payload<T: Serialize>(
        message_type: impl Into<MessageType>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(message_type, serde_json::to_value(payload)?))
    }

    /// Reply correlated with `request`
    pub fn reply_to(request: &WsMessage, message_type: impl Into<MessageType>, payload: Value) -> Self {
        Self {
            id: request.id.clone(),
            workflow_id: request.workflow_id.clone(),
            ..Self::new(message_type, payload)
        }
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn ping() -> Self {
        Self::new(MessageType::Ping, Value::Object(Default::default()))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Decode the payload into its typed form
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Workflow the message targets: `payload.workflow_id`, falling back to
    /// the envelope field
    pub fn target_workflow(&self) -> Option<&str> {
        self.payload
            .get("workflow_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .or_else(|| self.workflow_id.as_deref().filter(|id| !id.is_empty()))
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// `register`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub service_name: String,
    pub service_id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub version: String,
}

/// `phase_changed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseChangedPayload {
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Phase>,
    pub to: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `checkpoint`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub workflow_id: String,
    pub checkpoint_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// `error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// `progress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub workflow_id: String,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
}

/// `pause`, `resume`, `cancel` and `status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `status_response`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponsePayload {
    pub workflow_id: String,
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PhaseState>,
}
