//! Workflow expander
//!
//! Turns a [`WorkflowDefinition`] into a flat list of concrete action
//! instances for one run. Every identifier and dependency reference is
//! namespaced as `<run_id>--<original>` so concurrent runs of the same
//! workflow never collide.
//!
//! Expansion is synchronous and has no side effects beyond drawing one run
//! identifier and notifying the observer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::definition::{
    merge_dependencies, LoopDefinition, WorkflowAction, WorkflowDefinition, DEFAULT_MAX_ITERATIONS,
};
use super::observer::{ExpansionEvent, ExpansionObserver, TracingObserver};
use crate::action::{ActionStatus, BackoffStrategy, ControlMetadata, SemanticScheduledAction};

/// Separator between the run identifier and the original identifier
pub const RUN_ID_SEPARATOR: &str = "--";

/// Errors produced during expansion
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpansionError {
    #[error("workflow {workflow_id} has no actions")]
    EmptyWorkflow { workflow_id: String },

    #[error("{location}: action has no identifier")]
    MissingIdentifier { location: String },

    #[error("loop {loop_id}: item {index} has no action")]
    MissingItemAction { loop_id: String, index: usize },

    #[error("loop {loop_id} has {items} items, exceeding the limit of {limit}")]
    LoopLimitExceeded {
        loop_id: String,
        items: usize,
        limit: usize,
    },
}

/// Expander configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpanderConfig {
    /// Iteration bound for loops that do not set their own
    pub default_max_iterations: usize,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            default_max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl ExpanderConfig {
    pub fn with_default_max_iterations(mut self, max: usize) -> Self {
        self.default_max_iterations = max;
        self
    }
}

/// The result of expanding one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedRun {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub actions: Vec<SemanticScheduledAction>,
}

impl ExpandedRun {
    /// Number of action instances
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Look up an instance by its original (unprefixed) identifier
    pub fn find(&self, original_id: &str) -> Option<&SemanticScheduledAction> {
        let id = prefixed_id(self.run_id, original_id);
        self.actions.iter().find(|a| a.identifier() == id)
    }
}

/// Namespace an identifier with a run identifier
pub fn prefixed_id(run_id: Uuid, original: &str) -> String {
    format!("{run_id}{RUN_ID_SEPARATOR}{original}")
}

/// Strip the run prefix from an instance identifier
pub fn original_id(instance_id: &str) -> &str {
    match instance_id.split_once(RUN_ID_SEPARATOR) {
        Some((prefix, rest)) if Uuid::parse_str(prefix).is_ok() => rest,
        _ => instance_id,
    }
}

/// Expands workflow definitions into action instances
pub struct WorkflowExpander {
    config: ExpanderConfig,
    observer: Arc<dyn ExpansionObserver>,
}

impl Default for WorkflowExpander {
    fn default() -> Self {
        Self::new(ExpanderConfig::default())
    }
}

impl std::fmt::Debug for WorkflowExpander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExpander")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorkflowExpander {
    /// Create an expander that reports to `tracing`
    pub fn new(config: ExpanderConfig) -> Self {
        Self {
            config,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the observer
    pub fn with_observer(mut self, observer: Arc<dyn ExpansionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &ExpanderConfig {
        &self.config
    }

    /// Expand with a freshly generated run identifier
    pub fn expand(&self, definition: &WorkflowDefinition) -> Result<ExpandedRun, ExpansionError> {
        self.expand_with_run_id(definition, Uuid::now_v7())
    }

    /// Expand and return only the action instances
    pub fn expand_to_actions(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<Vec<SemanticScheduledAction>, ExpansionError> {
        self.expand(definition).map(|run| run.actions)
    }

    /// Expand with a caller-supplied run identifier
    pub fn expand_with_run_id(
        &self,
        definition: &WorkflowDefinition,
        run_id: Uuid,
    ) -> Result<ExpandedRun, ExpansionError> {
        self.observer.on_event(&ExpansionEvent::RunStarted {
            run_id,
            workflow_id: definition.identifier.clone(),
            actions: definition.actions.len(),
        });

        match self.expand_actions(definition, run_id) {
            Ok(actions) => {
                self.observer.on_event(&ExpansionEvent::RunCompleted {
                    run_id,
                    workflow_id: definition.identifier.clone(),
                    instances: actions.len(),
                });
                Ok(ExpandedRun {
                    run_id,
                    workflow_id: definition.identifier.clone(),
                    actions,
                })
            }
            Err(e) => {
                self.observer.on_event(&ExpansionEvent::RunFailed {
                    run_id,
                    workflow_id: definition.identifier.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn expand_actions(
        &self,
        definition: &WorkflowDefinition,
        run_id: Uuid,
    ) -> Result<Vec<SemanticScheduledAction>, ExpansionError> {
        if definition.actions.is_empty() {
            return Err(ExpansionError::EmptyWorkflow {
                workflow_id: definition.identifier.clone(),
            });
        }

        let now = Utc::now();
        let mut instances = Vec::with_capacity(definition.instance_count());

        for (index, workflow_action) in definition.actions.iter().enumerate() {
            match workflow_action {
                WorkflowAction::Single {
                    action,
                    dependencies,
                } => {
                    let location = format!("actions[{index}]");
                    instances.push(self.expand_single(run_id, action, dependencies, now, &location)?);
                }
                WorkflowAction::Loop {
                    definition: looped,
                    dependencies,
                } => {
                    self.expand_loop(run_id, looped, dependencies, now, &mut instances)?;
                }
            }
        }

        Ok(instances)
    }

    fn expand_loop(
        &self,
        run_id: Uuid,
        looped: &LoopDefinition,
        inherited: &[String],
        now: DateTime<Utc>,
        instances: &mut Vec<SemanticScheduledAction>,
    ) -> Result<(), ExpansionError> {
        let limit = looped
            .max_iterations
            .unwrap_or(self.config.default_max_iterations);

        if looped.items.len() > limit {
            self.observer.on_event(&ExpansionEvent::LoopLimitExceeded {
                run_id,
                loop_id: looped.identifier.clone(),
                items: looped.items.len(),
                limit,
            });
            return Err(ExpansionError::LoopLimitExceeded {
                loop_id: looped.identifier.clone(),
                items: looped.items.len(),
                limit,
            });
        }

        let dependencies = merge_dependencies(&looped.dependencies, inherited);

        for (index, item) in looped.items.iter().enumerate() {
            let action = item
                .action
                .as_deref()
                .ok_or_else(|| ExpansionError::MissingItemAction {
                    loop_id: looped.identifier.clone(),
                    index,
                })?;
            let location = format!("{}[{index}]", looped.identifier);
            instances.push(self.expand_single(run_id, action, &dependencies, now, &location)?);
        }

        self.observer.on_event(&ExpansionEvent::LoopExpanded {
            run_id,
            loop_id: looped.identifier.clone(),
            iterations: looped.items.len(),
        });

        Ok(())
    }

    fn expand_single(
        &self,
        run_id: Uuid,
        source: &SemanticScheduledAction,
        inherited: &[String],
        now: DateTime<Utc>,
        location: &str,
    ) -> Result<SemanticScheduledAction, ExpansionError> {
        let mut action = source.clone();

        let original = action
            .action
            .effective_identifier()
            .map(str::to_string)
            .ok_or_else(|| ExpansionError::MissingIdentifier {
                location: location.to_string(),
            })?;
        action.action.id = None;
        action.action.identifier = prefixed_id(run_id, &original);

        action.requires = merge_dependencies(&source.requires, inherited)
            .iter()
            .map(|dep| prefixed_id(run_id, dep))
            .collect();

        apply_defaults(&mut action, now);

        self.observer.on_event(&ExpansionEvent::ActionExpanded {
            run_id,
            source_id: original,
            instance_id: action.action.identifier.clone(),
            dependencies: action.requires.len(),
        });

        Ok(action)
    }
}

/// Fill in control metadata, timestamps and status
fn apply_defaults(action: &mut SemanticScheduledAction, now: DateTime<Utc>) {
    let route = action.target_route();

    let control = action.control.get_or_insert_with(|| ControlMetadata {
        enabled: Some(true),
        ..ControlMetadata::default()
    });
    control.singleton.get_or_insert(true);
    control.retry_backoff.get_or_insert(BackoffStrategy::Exponential);

    // Explicit control routing always wins over the target payload
    if control.url.is_none() {
        if let Some(route) = route {
            control.url = Some(route.url);
            if control.method.is_none() {
                control.method = route.method;
            }
        }
    }

    action.date_created = Some(now);
    action.date_modified = Some(now);
    action
        .action
        .action_status
        .get_or_insert(ActionStatus::Potential);
}
