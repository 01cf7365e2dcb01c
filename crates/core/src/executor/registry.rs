//! Executor registry
//!
//! Dispatch is an ordered predicate match: executors are asked in
//! registration order and the first whose `can_handle` returns true runs the
//! action. Registration order is therefore the precedence rule.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::Instrument;

use super::result::codes;
use super::{ExecutionContext, ExecutionError, ExecutionHooks, ExecutionResult, Executor};
use crate::action::SemanticScheduledAction;

/// Metadata key holding the name of the executor that ran the action
pub const EXECUTOR_METADATA_KEY: &str = "executor";

/// Ordered collection of executors plus execution hooks
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: Vec<Arc<dyn Executor>>,
    hooks: Vec<Arc<dyn ExecutionHooks>>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.names())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl ExecutorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor after all existing ones
    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        tracing::debug!(executor = executor.name(), "registered executor");
        self.executors.push(executor);
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.register(executor);
        self
    }

    /// Add execution hooks; hooks run in the order they were added
    pub fn add_hooks(&mut self, hooks: Arc<dyn ExecutionHooks>) {
        self.hooks.push(hooks);
    }

    /// Builder form of [`add_hooks`](Self::add_hooks)
    pub fn with_hooks(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.add_hooks(hooks);
        self
    }

    /// Names of registered executors, in precedence order
    pub fn names(&self) -> Vec<&str> {
        self.executors.iter().map(|e| e.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// First executor able to handle the action
    pub fn find(&self, action: &SemanticScheduledAction) -> Option<Arc<dyn Executor>> {
        self.executors
            .iter()
            .find(|executor| executor.can_handle(action))
            .cloned()
    }

    /// Whether any executor can handle the action
    pub fn can_handle(&self, action: &SemanticScheduledAction) -> bool {
        self.executors.iter().any(|e| e.can_handle(action))
    }

    /// Run an action on the first matching executor
    ///
    /// Never fails: a missing executor, an executor error, cancellation and
    /// timeout all produce a result with the matching status and error code.
    /// The registry's own timestamps replace the executor's.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        action: &SemanticScheduledAction,
    ) -> ExecutionResult {
        let span = tracing::info_span!(
            "execute_action",
            action_id = %action.identifier(),
            action_type = %action.action_type(),
        );
        self.dispatch(ctx, action).instrument(span).await
    }

    async fn dispatch(
        &self,
        ctx: &ExecutionContext,
        action: &SemanticScheduledAction,
    ) -> ExecutionResult {
        let started_at = Utc::now();

        let Some(executor) = self.find(action) else {
            tracing::warn!("no executor can handle action");
            let mut result = ExecutionResult::failed(ExecutionError::new(
                codes::NO_EXECUTOR,
                format!(
                    "no executor registered for action type {}",
                    action.action_type()
                ),
            ));
            result.started_at = Some(started_at);
            result.ended_at = Some(Utc::now());
            self.run_after_hooks(action, &result).await;
            return result;
        };

        let name = executor.name().to_string();
        for hooks in &self.hooks {
            hooks.before_execute(action, &name).await;
        }

        let outcome = if ctx.is_cancelled() {
            Err(ExecutionError::cancelled())
        } else {
            let run = async {
                match ctx.timeout {
                    Some(limit) => tokio::time::timeout(limit, executor.execute(ctx, action))
                        .await
                        .unwrap_or_else(|_| {
                            Err(ExecutionError::new(
                                codes::TIMEOUT,
                                format!("execution exceeded {}ms", limit.as_millis()),
                            ))
                        }),
                    None => executor.execute(ctx, action).await,
                }
            };

            tokio::select! {
                biased;
                _ = ctx.cancelled() => Err(ExecutionError::cancelled()),
                outcome = run => outcome,
            }
        };

        let mut result = match outcome {
            Ok(result) => result,
            Err(error) => ExecutionResult::failed(error),
        };
        result.started_at = Some(started_at);
        result.ended_at = Some(Utc::now());
        result
            .metadata
            .insert(EXECUTOR_METADATA_KEY.to_string(), name.clone().into());

        match &result.error {
            None => tracing::info!(executor = %name, status = %result.status, "action executed"),
            Some(error) => tracing::warn!(
                executor = %name,
                status = %result.status,
                code = %error.code,
                error = %error.message,
                "action execution failed"
            ),
        }

        self.run_after_hooks(action, &result).await;
        result
    }

    async fn run_after_hooks(&self, action: &SemanticScheduledAction, result: &ExecutionResult) {
        for hooks in &self.hooks {
            if let Some(error) = &result.error {
                hooks.on_error(action, error).await;
            }
            hooks.after_execute(action, result).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::executor::ExecutionStatus;

    struct StaticExecutor {
        name: &'static str,
        action_type: &'static str,
        calls: AtomicUsize,
        outcome: Result<&'static str, &'static str>,
    }

    impl StaticExecutor {
        fn ok(name: &'static str, action_type: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                action_type,
                calls: AtomicUsize::new(0),
                outcome: Ok(name),
            })
        }

        fn failing(name: &'static str, action_type: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                action_type,
                calls: AtomicUsize::new(0),
                outcome: Err("E_STATIC"),
            })
        }
    }

    #[async_trait]
    impl Executor for StaticExecutor {
        fn name(&self) -> &str {
            self.name
        }

        fn can_handle(&self, action: &SemanticScheduledAction) -> bool {
            action.action_type() == self.action_type
        }

        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            _action: &SemanticScheduledAction,
        ) -> Result<ExecutionResult, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Ok(output) => Ok(ExecutionResult::completed(output)),
                Err(code) => Err(ExecutionError::new(code, "static failure")),
            }
        }
    }

    struct SlowExecutor;

    #[async_trait]
    impl Executor for SlowExecutor {
        fn name(&self) -> &str {
            "slow"
        }

        fn can_handle(&self, _action: &SemanticScheduledAction) -> bool {
            true
        }

        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            _action: &SemanticScheduledAction,
        ) -> Result<ExecutionResult, ExecutionError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ExecutionResult::completed("late"))
        }
    }

    #[derive(Default)]
    struct RecordingHooks {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExecutionHooks for RecordingHooks {
        async fn before_execute(&self, _action: &SemanticScheduledAction, executor: &str) {
            self.calls.lock().push(format!("before:{executor}"));
        }

        async fn after_execute(&self, _action: &SemanticScheduledAction, result: &ExecutionResult) {
            self.calls.lock().push(format!("after:{}", result.status));
        }

        async fn on_error(&self, _action: &SemanticScheduledAction, error: &ExecutionError) {
            self.calls.lock().push(format!("error:{}", error.code));
        }
    }

    fn action(action_type: &str) -> SemanticScheduledAction {
        SemanticScheduledAction::new(action_type, "a")
    }

    #[tokio::test]
    async fn test_first_registered_executor_wins() {
        let first = StaticExecutor::ok("first", "CreateAction");
        let second = StaticExecutor::ok("second", "CreateAction");
        let registry = ExecutorRegistry::new()
            .with_executor(first.clone())
            .with_executor(second.clone());

        let result = registry
            .execute(&ExecutionContext::new(), &action("CreateAction"))
            .await;

        assert_eq!(result.output, "first");
        assert_eq!(result.metadata[EXECUTOR_METADATA_KEY], "first");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.names(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_no_executor() {
        let executor = StaticExecutor::ok("create", "CreateAction");
        let registry = ExecutorRegistry::new().with_executor(executor.clone());

        let result = registry
            .execute(&ExecutionContext::new(), &action("DeleteAction"))
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error_code(), Some(codes::NO_EXECUTOR));
        assert!(result.started_at.is_some() && result.ended_at.is_some());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_executor_error_becomes_failed_result() {
        let registry =
            ExecutorRegistry::new().with_executor(StaticExecutor::failing("bad", "Action"));

        let result = registry
            .execute(&ExecutionContext::new(), &action("Action"))
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error_code(), Some("E_STATIC"));
        assert_eq!(result.metadata[EXECUTOR_METADATA_KEY], "bad");
        assert!(result.duration().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let registry = ExecutorRegistry::new().with_executor(Arc::new(SlowExecutor));
        let ctx = ExecutionContext::new().with_timeout(Duration::from_millis(50));

        let result = registry.execute(&ctx, &action("Action")).await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error_code(), Some(codes::TIMEOUT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation() {
        let registry = ExecutorRegistry::new().with_executor(Arc::new(SlowExecutor));
        let ctx = ExecutionContext::new();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = registry.execute(&ctx, &action("Action")).await;

        assert_eq!(result.status, ExecutionStatus::Cancelled);
        assert_eq!(result.error_code(), Some(codes::CANCELLED));
    }

    #[tokio::test]
    async fn test_hooks_run_in_order() {
        let hooks = Arc::new(RecordingHooks::default());
        let registry = ExecutorRegistry::new()
            .with_executor(StaticExecutor::failing("bad", "Action"))
            .with_hooks(hooks.clone());

        registry
            .execute(&ExecutionContext::new(), &action("Action"))
            .await;

        assert_eq!(
            *hooks.calls.lock(),
            vec!["before:bad", "error:E_STATIC", "after:failed"]
        );
    }
}
