//! Executor capability and execution hooks

use async_trait::async_trait;

use super::{ExecutionContext, ExecutionError, ExecutionResult};
use crate::action::SemanticScheduledAction;

/// A pluggable backend able to run a class of actions
///
/// Integrators add an execution backend by implementing these three
/// methods and registering an instance with an
/// [`ExecutorRegistry`](super::ExecutorRegistry).
///
/// # Example
///
/// ```ignore
/// struct EmailExecutor;
///
/// #[async_trait]
/// impl Executor for EmailExecutor {
///     fn name(&self) -> &str {
///         "email"
///     }
///
///     fn can_handle(&self, action: &SemanticScheduledAction) -> bool {
///         action.action_type() == "SendAction"
///     }
///
///     async fn execute(
///         &self,
///         ctx: &ExecutionContext,
///         action: &SemanticScheduledAction,
///     ) -> Result<ExecutionResult, ExecutionError> {
///         Ok(ExecutionResult::completed("sent"))
///     }
/// }
/// ```
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name copied into result metadata
    fn name(&self) -> &str;

    /// Whether this executor can run the action
    fn can_handle(&self, action: &SemanticScheduledAction) -> bool;

    /// Run the action
    ///
    /// Implementations must stop promptly once `ctx` is cancelled. Failures
    /// are returned as `Err`; the registry turns them into a failed result.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        action: &SemanticScheduledAction,
    ) -> Result<ExecutionResult, ExecutionError>;
}

/// Callbacks around every registry dispatch
///
/// All methods default to no-ops. Hooks run in registration order and
/// cannot alter the result.
#[async_trait]
pub trait ExecutionHooks: Send + Sync {
    /// Called after an executor was selected, before it runs
    async fn before_execute(&self, _action: &SemanticScheduledAction, _executor: &str) {}

    /// Called with every result, successful or not
    async fn after_execute(&self, _action: &SemanticScheduledAction, _result: &ExecutionResult) {}

    /// Called when the result carries an error
    async fn on_error(&self, _action: &SemanticScheduledAction, _error: &ExecutionError) {}
}
