//! Execution result and error types

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{ActionStatus, SemanticScheduledAction, StatusTransitionError};

/// Well-known error codes
pub mod codes {
    /// No registered executor can handle the action
    pub const NO_EXECUTOR: &str = "NO_EXECUTOR";
    /// The caller cancelled the execution
    pub const CANCELLED: &str = "CANCELLED";
    /// The execution context deadline elapsed
    pub const TIMEOUT: &str = "TIMEOUT";
    /// The action lacks data an executor needs
    pub const INVALID_ACTION: &str = "INVALID_ACTION";
    /// HTTP request could not be sent or completed
    pub const HTTP_TRANSPORT: &str = "HTTP_TRANSPORT";
    /// HTTP request timed out
    pub const HTTP_TIMEOUT: &str = "HTTP_TIMEOUT";
    /// Command exited with a non-zero status
    pub const COMMAND_FAILED: &str = "COMMAND_FAILED";
    /// Command could not be started
    pub const COMMAND_SPAWN_FAILED: &str = "COMMAND_SPAWN_FAILED";

    /// Code for a non-2xx HTTP status, e.g. `HTTP_404`
    pub fn http_status(status: u16) -> String {
        format!("HTTP_{status}")
    }
}

/// Status of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Closest action status (cancellation maps to Failed)
    pub fn action_status(&self) -> ActionStatus {
        match self {
            Self::Pending => ActionStatus::Potential,
            Self::Running => ActionStatus::Active,
            Self::Completed => ActionStatus::Completed,
            Self::Failed | Self::Cancelled => ActionStatus::Failed,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Structured execution error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Human-readable message
    pub message: String,

    /// Machine-readable code (see [`codes`])
    pub code: String,

    /// Additional details for debugging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ExecutionError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Attach details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn cancelled() -> Self {
        Self::new(codes::CANCELLED, "execution cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == codes::CANCELLED
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ExecutionError {}

/// Outcome of running one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Output text (response body, command output, ...)
    #[serde(default)]
    pub output: String,

    pub status: ExecutionStatus,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    /// Successful result with output
    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            status: ExecutionStatus::Completed,
            metadata: HashMap::new(),
            error: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// Failed (or cancelled) result from an error
    pub fn failed(error: ExecutionError) -> Self {
        let status = if error.is_cancelled() {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Failed
        };
        Self {
            output: String::new(),
            status,
            metadata: HashMap::new(),
            error: Some(error),
            started_at: None,
            ended_at: None,
        }
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the output text
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Error code, if any
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    /// Wall-clock duration, when both timestamps are known
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Reflect this result into the action's status, timestamps and result fields.
    ///
    /// The action is left untouched when its current status cannot move to
    /// the result's status, e.g. a completed action receiving a failure.
    pub fn apply_to(
        &self,
        action: &mut SemanticScheduledAction,
    ) -> Result<(), StatusTransitionError> {
        let status = action
            .action
            .status()
            .transition(self.status.action_status())?;
        action.action.action_status = Some(status);
        action.action.start_time = self.started_at.or(action.action.start_time);
        action.action.end_time = self.ended_at.or(action.action.end_time);

        if let Some(error) = &self.error {
            action.action.error = serde_json::to_value(error).ok();
            action.action.result = None;
        } else {
            action.action.result = Some(Value::String(self.output.clone()));
            action.action.error = None;
        }
        action.date_modified = Some(Utc::now());
        Ok(())
    }
}
