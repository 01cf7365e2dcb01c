// Sequential workflow runner
//
// Executes the instances of an expanded run in order. The run id is the
// workflow id for phase tracking, so a hub sees each run separately.
// Remote pause holds the runner between actions; remote cancel stops it.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use schemaflow_coordinator::{
    CoordinatorHandle, Phase, PhaseChange, PhaseListener, PhaseManager,
};
use schemaflow_core::executor::EXECUTOR_METADATA_KEY;
use schemaflow_core::{
    ActionStatus, CommandExecutor, ExecutionContext, ExecutionError, ExecutionResult,
    ExecutorRegistry, ExpandedRun, HttpExecutor, HttpExecutorConfig, SemanticScheduledAction,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Error code for an instance whose dependencies did not complete
pub const DEPENDENCY_FAILED: &str = "DEPENDENCY_FAILED";

/// Registry with the HTTP and command executors
pub fn default_registry() -> Result<ExecutorRegistry> {
    let http = HttpExecutor::new(HttpExecutorConfig::default())
        .context("failed to build HTTP client")?;
    Ok(ExecutorRegistry::new()
        .with_executor(Arc::new(http))
        .with_executor(Arc::new(CommandExecutor::new())))
}

/// Outcome of one action instance
#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub identifier: String,
    pub action_type: String,
    /// `completed`, `failed`, `cancelled` or `skipped`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl ActionReport {
    fn skipped(action: &SemanticScheduledAction) -> Self {
        Self {
            identifier: action.identifier().to_string(),
            action_type: action.action_type().to_string(),
            status: "skipped".to_string(),
            executor: None,
            error_code: None,
            error: None,
            duration_ms: None,
        }
    }

    fn from_result(action: &SemanticScheduledAction, result: &ExecutionResult) -> Self {
        Self {
            identifier: action.identifier().to_string(),
            action_type: action.action_type().to_string(),
            status: result.status.to_string(),
            executor: result
                .metadata
                .get(EXECUTOR_METADATA_KEY)
                .and_then(|v| v.as_str())
                .map(str::to_string),
            error_code: result.error_code().map(str::to_string),
            error: result.error.as_ref().map(|e| e.message.clone()),
            duration_ms: result.duration().map(|d| d.num_milliseconds()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == "failed" || self.status == "cancelled"
    }
}

/// Outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub phase: Phase,
    /// Instances in the run, including ones never reached
    pub total: usize,
    pub actions: Vec<ActionReport>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.actions.iter().filter(|a| a.is_failure()).count()
    }
}

/// Mirrors one workflow's phase into a watch channel and turns a
/// cancellation into a token cancel
struct PhaseGate {
    workflow_id: String,
    phase: watch::Sender<Phase>,
    cancel: CancellationToken,
}

impl PhaseListener for PhaseGate {
    fn on_phase_change(&self, change: &PhaseChange) {
        if change.workflow_id != self.workflow_id {
            return;
        }
        self.phase.send_replace(change.to);
        if change.to == Phase::Cancelled {
            self.cancel.cancel();
        }
    }
}

/// Hold while paused. Returns false once the run is cancelled.
async fn wait_while_paused(phase: &mut watch::Receiver<Phase>, cancel: &CancellationToken) -> bool {
    if *phase.borrow() == Phase::Paused {
        info!("run paused, waiting for resume");
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        resumed = phase.wait_for(|p| *p != Phase::Paused) => resumed.is_ok() && !cancel.is_cancelled(),
    }
}

pub struct WorkflowRunner {
    registry: ExecutorRegistry,
    phases: Arc<PhaseManager>,
    hub: Option<CoordinatorHandle>,
}

impl WorkflowRunner {
    pub fn new(registry: ExecutorRegistry, phases: Arc<PhaseManager>) -> Self {
        Self {
            registry,
            phases,
            hub: None,
        }
    }

    /// Also report progress and errors to the hub
    pub fn with_hub(mut self, handle: CoordinatorHandle) -> Self {
        self.hub = Some(handle);
        self
    }

    /// Execute every instance in order, recording results on the run's actions.
    ///
    /// Disabled instances are skipped. An instance with a dependency that did
    /// not complete fails with [`DEPENDENCY_FAILED`] without being executed.
    #[instrument(skip_all, fields(run_id = %run.run_id, workflow_id = %run.workflow_id))]
    pub async fn execute(&self, run: &mut ExpandedRun, cancel: &CancellationToken) -> RunReport {
        let workflow_id = run.run_id.to_string();
        let (phase_tx, mut phase) = watch::channel(Phase::Potential);
        self.phases.add_listener(Arc::new(PhaseGate {
            workflow_id: workflow_id.clone(),
            phase: phase_tx,
            cancel: cancel.clone(),
        }));

        if let Err(e) = self.phases.start(&workflow_id) {
            warn!(error = %e, "could not mark run active");
        }

        let total = run.actions.len();
        let mut reports = Vec::with_capacity(total);
        let mut statuses: HashMap<String, ActionStatus> = HashMap::with_capacity(total);

        for index in 0..total {
            if !wait_while_paused(&mut phase, cancel).await {
                break;
            }

            let action = &mut run.actions[index];
            let report = if !action.is_enabled() {
                debug!(action_id = %action.identifier(), "action disabled, skipping");
                ActionReport::skipped(action)
            } else {
                let unmet = action
                    .requires
                    .iter()
                    .find(|dep| statuses.get(dep.as_str()) != Some(&ActionStatus::Completed))
                    .cloned();
                let result = match unmet {
                    Some(dependency) => {
                        warn!(
                            action_id = %action.identifier(),
                            dependency = %dependency,
                            "dependency did not complete, action not executed"
                        );
                        ExecutionResult::failed(ExecutionError::new(
                            DEPENDENCY_FAILED,
                            format!("dependency {dependency} did not complete"),
                        ))
                    }
                    None => {
                        let ctx = ExecutionContext::with_parent(cancel)
                            .with_workflow_id(workflow_id.as_str());
                        self.registry.execute(&ctx, action).await
                    }
                };
                if let Err(e) = result.apply_to(action) {
                    warn!(
                        action_id = %action.identifier(),
                        error = %e,
                        "result not recorded on action"
                    );
                }
                self.report_error(&workflow_id, action, &result);
                ActionReport::from_result(action, &result)
            };

            statuses.insert(action.identifier().to_string(), action.action.status());
            let progress = (index + 1) as f64 / total as f64;
            self.report_progress(&workflow_id, progress, action.identifier());
            reports.push(report);
        }

        // A pause during the last action holds completion too
        if !cancel.is_cancelled() {
            wait_while_paused(&mut phase, cancel).await;
        }

        let report = RunReport {
            run_id: run.run_id,
            workflow_id: run.workflow_id.clone(),
            phase: Phase::Active,
            total,
            actions: reports,
        };
        let failed = report.failed();
        let finished = if cancel.is_cancelled() {
            self.phases.cancel(&workflow_id, Some("run cancelled".to_string()))
        } else if failed > 0 {
            self.phases
                .fail(&workflow_id, format!("{failed} of {total} actions failed"))
        } else {
            self.phases.complete(&workflow_id)
        };
        if let Err(e) = finished {
            warn!(error = %e, "could not record final phase");
        }

        let phase = self
            .phases
            .get(&workflow_id)
            .map_or(Phase::Failed, |state| state.phase);
        info!(phase = %phase, failed, total, "run finished");
        RunReport { phase, ..report }
    }

    fn report_error(
        &self,
        workflow_id: &str,
        action: &SemanticScheduledAction,
        result: &ExecutionResult,
    ) {
        let (Some(hub), Some(error)) = (&self.hub, &result.error) else {
            return;
        };
        hub.report_error(
            Some(workflow_id),
            error.code.clone(),
            error.message.clone(),
            Some(json!({ "action_id": action.identifier() })),
        );
    }

    fn report_progress(&self, workflow_id: &str, progress: f64, action_id: &str) {
        if let Err(e) =
            self.phases
                .report_progress(workflow_id, progress, Some(action_id.to_string()))
        {
            debug!(error = %e, "progress not recorded");
        }
        if let Some(hub) = &self.hub {
            hub.report_progress(workflow_id, progress, Some(action_id.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use schemaflow_core::{ControlMetadata, Executor};
    use std::time::Duration;
    use test_log::test;

    fn command(id: &str, line: &str) -> SemanticScheduledAction {
        SemanticScheduledAction::new("Action", id).with_property("command", json!(line))
    }

    fn run_of(actions: Vec<SemanticScheduledAction>) -> ExpandedRun {
        ExpandedRun {
            run_id: Uuid::now_v7(),
            workflow_id: "wf".to_string(),
            actions,
        }
    }

    fn runner(phases: &Arc<PhaseManager>) -> WorkflowRunner {
        WorkflowRunner::new(
            ExecutorRegistry::new().with_executor(Arc::new(CommandExecutor::new())),
            phases.clone(),
        )
    }

    #[test(tokio::test)]
    async fn test_runs_in_order_and_completes() {
        let phases = Arc::new(PhaseManager::new());
        let mut run = run_of(vec![
            command("first", "echo one"),
            command("second", "echo two").with_requires("first"),
        ]);

        let report = runner(&phases).execute(&mut run, &CancellationToken::new()).await;

        assert_eq!(report.phase, Phase::Completed);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.actions.len(), 2);
        assert_eq!(report.actions[0].executor.as_deref(), Some("command"));
        assert_eq!(run.actions[1].action.status(), ActionStatus::Completed);
        assert_eq!(run.actions[1].action.result, Some(json!("two\n")));

        let state = phases.get(&run.run_id.to_string()).unwrap();
        assert_eq!(state.progress, 1.0);
    }

    #[test(tokio::test)]
    async fn test_failed_dependency_fails_dependents() {
        let phases = Arc::new(PhaseManager::new());
        let mut run = run_of(vec![
            command("build", "exit 3"),
            command("publish", "echo never").with_requires("build"),
            command("cleanup", "true"),
        ]);

        let report = runner(&phases).execute(&mut run, &CancellationToken::new()).await;

        assert_eq!(report.phase, Phase::Failed);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.actions[0].error_code.as_deref(), Some("COMMAND_FAILED"));
        assert_eq!(report.actions[1].error_code.as_deref(), Some(DEPENDENCY_FAILED));
        assert!(report.actions[1].executor.is_none());
        assert_eq!(report.actions[2].status, "completed");
        assert_eq!(run.actions[1].action.status(), ActionStatus::Failed);
    }

    #[test(tokio::test)]
    async fn test_disabled_actions_are_skipped() {
        let phases = Arc::new(PhaseManager::new());
        let disabled = ControlMetadata {
            enabled: Some(false),
            ..Default::default()
        };
        let mut run = run_of(vec![
            command("optional", "exit 1").with_control(disabled),
            command("main", "true"),
            command("after-optional", "true").with_requires("optional"),
        ]);

        let report = runner(&phases).execute(&mut run, &CancellationToken::new()).await;

        assert_eq!(report.actions[0].status, "skipped");
        assert_eq!(report.actions[1].status, "completed");
        assert_eq!(report.actions[2].error_code.as_deref(), Some(DEPENDENCY_FAILED));
        assert_eq!(report.phase, Phase::Failed);
    }

    #[test(tokio::test)]
    async fn test_cancelled_before_start() {
        let phases = Arc::new(PhaseManager::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut run = run_of(vec![command("first", "true")]);

        let report = runner(&phases).execute(&mut run, &cancel).await;

        assert_eq!(report.phase, Phase::Cancelled);
        assert!(report.actions.is_empty());
        assert_eq!(report.total, 1);
    }

    #[test(tokio::test)]
    async fn test_remote_cancel_stops_running_action() {
        let phases = Arc::new(PhaseManager::new());
        let mut run = run_of(vec![command("slow", "sleep 5"), command("next", "true")]);
        let workflow_id = run.run_id.to_string();

        let canceller = tokio::spawn({
            let phases = phases.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                phases.cancel(&workflow_id, Some("operator".into())).unwrap();
            }
        });

        let report = runner(&phases).execute(&mut run, &CancellationToken::new()).await;
        canceller.await.unwrap();

        assert_eq!(report.phase, Phase::Cancelled);
        assert_eq!(report.actions.len(), 1);
        assert_eq!(report.actions[0].status, "cancelled");
    }

    /// Pauses the workflow while running `pause-here` and records the phase
    /// seen by every action
    struct PausingExecutor {
        phases: Arc<PhaseManager>,
        seen: Mutex<Vec<(String, Phase)>>,
    }

    #[async_trait]
    impl Executor for PausingExecutor {
        fn name(&self) -> &str {
            "pausing"
        }

        fn can_handle(&self, _action: &SemanticScheduledAction) -> bool {
            true
        }

        async fn execute(
            &self,
            ctx: &ExecutionContext,
            action: &SemanticScheduledAction,
        ) -> Result<ExecutionResult, ExecutionError> {
            let workflow_id = ctx.workflow_id.clone().unwrap_or_default();
            let phase = self.phases.get(&workflow_id).map(|s| s.phase).unwrap();
            self.seen.lock().push((action.identifier().to_string(), phase));

            if action.identifier() == "pause-here" {
                self.phases.pause(&workflow_id, None).unwrap();
                let phases = self.phases.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    phases.resume(&workflow_id).unwrap();
                });
            }
            Ok(ExecutionResult::completed("ok"))
        }
    }

    #[test(tokio::test)]
    async fn test_pause_holds_until_resume() {
        let phases = Arc::new(PhaseManager::new());
        let executor = Arc::new(PausingExecutor {
            phases: phases.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let runner = WorkflowRunner::new(
            ExecutorRegistry::new().with_executor(executor.clone()),
            phases.clone(),
        );
        let mut run = run_of(vec![
            SemanticScheduledAction::new("Action", "pause-here"),
            SemanticScheduledAction::new("Action", "after"),
        ]);

        let report = runner.execute(&mut run, &CancellationToken::new()).await;

        assert_eq!(report.phase, Phase::Completed);
        let seen = executor.seen.lock().clone();
        assert_eq!(seen[1], ("after".to_string(), Phase::Active));
    }
}
