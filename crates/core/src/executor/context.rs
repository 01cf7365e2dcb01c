//! Execution context

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Context handed to executors
///
/// The context carries:
/// - A cancellation token the executor must honor
/// - An optional deadline for the whole execution
/// - The owning workflow and attempt number, for logging
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Workflow (or run) that owns the action
    pub workflow_id: Option<String>,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Overall deadline, enforced by the registry
    pub timeout: Option<Duration>,

    cancellation: CancellationToken,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            workflow_id: None,
            attempt: 1,
            timeout: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Derive a context from a parent token; cancelling the parent cancels this one
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self {
            cancellation: parent.child_token(),
            ..Self::new()
        }
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt.max(1);
        self
    }

    /// Cancel the execution
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the execution is cancelled
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Token shared with this context
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }
}
