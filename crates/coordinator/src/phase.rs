//! Workflow phase state machine
//!
//! The [`PhaseManager`] owns one [`PhaseState`] per workflow identifier and
//! validates every transition against the phase table:
//!
//! ```text
//!              ┌──────────── pause ────────────┐
//!              │                               ▼
//! Potential ──start──► Active ◄──resume──── Paused
//!     │                  │                     │
//!     └──────────────────┼─────────────────────┘
//!                        ▼
//!           Completed | Failed | Cancelled   (terminal)
//! ```
//!
//! Potential may also move straight to Paused, Failed or Cancelled; only an
//! Active workflow can complete. Listeners are notified after the state lock
//! is released, in registration order, once per effective transition.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use schemaflow_core::action::ActionStatus;
use schemaflow_core::ports::{AuditEvent, EventSink};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

/// Audit event type appended for each phase transition
pub const PHASE_CHANGED_EVENT: &str = "phase.changed";

/// Coarse lifecycle state of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Potential,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Potential => "potential",
            Phase::Active => "active",
            Phase::Paused => "paused",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
            Phase::Cancelled => "cancelled",
        }
    }

    /// Terminal phases accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Cancelled)
    }

    /// Whether `self -> to` is a legal move. Same-phase moves are not
    /// transitions and return false.
    pub fn can_transition_to(&self, to: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, to),
            (Potential, Active | Paused | Failed | Cancelled)
                | (Active, Paused | Completed | Failed | Cancelled)
                | (Paused, Active | Failed | Cancelled)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ActionStatus> for Phase {
    fn from(status: ActionStatus) -> Self {
        match status {
            ActionStatus::Potential => Phase::Potential,
            ActionStatus::Active => Phase::Active,
            ActionStatus::Paused => Phase::Paused,
            ActionStatus::Completed => Phase::Completed,
            ActionStatus::Failed => Phase::Failed,
        }
    }
}

/// Phase manager errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PhaseError {
    #[error("workflow not tracked: {0}")]
    NotFound(String),

    #[error("invalid phase transition for {workflow_id}: {from} -> {to}")]
    InvalidTransition {
        workflow_id: String,
        from: Phase,
        to: Phase,
    },

    #[error("progress must be between 0.0 and 1.0, got {0}")]
    InvalidProgress(f64),
}

/// Current state of one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub workflow_id: String,
    pub phase: Phase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Phase>,

    /// Fraction complete, 0.0 to 1.0
    #[serde(default)]
    pub progress: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,

    /// Reason given for the most recent transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl PhaseState {
    fn new(workflow_id: &str) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            phase: Phase::Potential,
            previous: None,
            progress: 0.0,
            current_action: None,
            checkpoint_id: None,
            reason: None,
            updated_at: Utc::now(),
        }
    }
}

/// One effective transition, as delivered to listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub workflow_id: String,

    /// None only for the change that starts tracking a workflow
    pub from: Option<Phase>,
    pub to: Phase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub timestamp: DateTime<Utc>,
}

/// Receives phase changes
pub trait PhaseListener: Send + Sync {
    fn on_phase_change(&self, change: &PhaseChange);
}

/// Tracks workflow phases and notifies listeners
#[derive(Default)]
pub struct PhaseManager {
    states: RwLock<HashMap<String, PhaseState>>,
    listeners: RwLock<Vec<Arc<dyn PhaseListener>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Untracked {
    Track,
    Reject,
}

impl PhaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; listeners run in registration order
    pub fn add_listener(&self, listener: Arc<dyn PhaseListener>) {
        self.listeners.write().push(listener);
    }

    pub fn with_listener(self, listener: Arc<dyn PhaseListener>) -> Self {
        self.add_listener(listener);
        self
    }

    /// Start tracking a workflow in the Potential phase. Already tracked
    /// workflows are left untouched.
    pub fn track(&self, workflow_id: &str) -> Option<PhaseChange> {
        let change = {
            let mut states = self.states.write();
            if states.contains_key(workflow_id) {
                return None;
            }
            let state = PhaseState::new(workflow_id);
            let change = PhaseChange {
                workflow_id: workflow_id.to_string(),
                from: None,
                to: Phase::Potential,
                checkpoint_id: None,
                reason: None,
                timestamp: state.updated_at,
            };
            states.insert(workflow_id.to_string(), state);
            change
        };
        self.notify(&change);
        Some(change)
    }

    /// Untracked workflows start from Potential
    pub fn start(&self, workflow_id: &str) -> Result<Option<PhaseChange>, PhaseError> {
        self.transition(workflow_id, Phase::Active, None)
    }

    pub fn pause(
        &self,
        workflow_id: &str,
        reason: Option<String>,
    ) -> Result<Option<PhaseChange>, PhaseError> {
        self.transition_tracked(workflow_id, Phase::Paused, reason)
    }

    /// Only a paused workflow can be resumed
    pub fn resume(&self, workflow_id: &str) -> Result<Option<PhaseChange>, PhaseError> {
        self.apply(workflow_id, Phase::Active, None, Untracked::Reject, Some(Phase::Paused))
    }

    pub fn cancel(
        &self,
        workflow_id: &str,
        reason: Option<String>,
    ) -> Result<Option<PhaseChange>, PhaseError> {
        self.transition_tracked(workflow_id, Phase::Cancelled, reason)
    }

    pub fn complete(&self, workflow_id: &str) -> Result<Option<PhaseChange>, PhaseError> {
        self.transition(workflow_id, Phase::Completed, None)
    }

    pub fn fail(
        &self,
        workflow_id: &str,
        reason: impl Into<String>,
    ) -> Result<Option<PhaseChange>, PhaseError> {
        self.transition(workflow_id, Phase::Failed, Some(reason.into()))
    }

    /// Move a workflow to `to`.
    ///
    /// Untracked workflows start from Potential. Returns `Ok(None)` when the
    /// workflow is already in `to`; no listener is called in that case.
    pub fn transition(
        &self,
        workflow_id: &str,
        to: Phase,
        reason: Option<String>,
    ) -> Result<Option<PhaseChange>, PhaseError> {
        self.apply(workflow_id, to, reason, Untracked::Track, None)
    }

    /// Like [`transition`](Self::transition), but fails with
    /// [`PhaseError::NotFound`] instead of tracking an unknown workflow
    pub fn transition_tracked(
        &self,
        workflow_id: &str,
        to: Phase,
        reason: Option<String>,
    ) -> Result<Option<PhaseChange>, PhaseError> {
        self.apply(workflow_id, to, reason, Untracked::Reject, None)
    }

    fn apply(
        &self,
        workflow_id: &str,
        to: Phase,
        reason: Option<String>,
        untracked: Untracked,
        required: Option<Phase>,
    ) -> Result<Option<PhaseChange>, PhaseError> {
        let change = {
            let mut states = self.states.write();
            let is_new = !states.contains_key(workflow_id);
            if is_new && untracked == Untracked::Reject {
                return Err(PhaseError::NotFound(workflow_id.to_string()));
            }
            let state = states
                .entry(workflow_id.to_string())
                .or_insert_with(|| PhaseState::new(workflow_id));

            if state.phase == to {
                return Ok(None);
            }
            let allowed = required.map_or(true, |phase| state.phase == phase)
                && state.phase.can_transition_to(to);
            if !allowed {
                let from = state.phase;
                if is_new {
                    states.remove(workflow_id);
                }
                return Err(PhaseError::InvalidTransition {
                    workflow_id: workflow_id.to_string(),
                    from,
                    to,
                });
            }

            let from = state.phase;
            state.previous = Some(from);
            state.phase = to;
            state.reason = reason.clone();
            state.updated_at = Utc::now();
            if to == Phase::Completed {
                state.progress = 1.0;
            }

            PhaseChange {
                workflow_id: workflow_id.to_string(),
                from: Some(from),
                to,
                checkpoint_id: state.checkpoint_id.clone(),
                reason,
                timestamp: state.updated_at,
            }
        };

        info!(
            workflow_id = %change.workflow_id,
            from = ?change.from,
            to = %change.to,
            "phase changed"
        );
        self.notify(&change);
        Ok(Some(change))
    }

    /// Record progress for a tracked, non-terminal workflow
    pub fn report_progress(
        &self,
        workflow_id: &str,
        progress: f64,
        current_action: Option<String>,
    ) -> Result<PhaseState, PhaseError> {
        if !(0.0..=1.0).contains(&progress) {
            return Err(PhaseError::InvalidProgress(progress));
        }

        let mut states = self.states.write();
        let state = states
            .get_mut(workflow_id)
            .ok_or_else(|| PhaseError::NotFound(workflow_id.to_string()))?;
        if state.phase.is_terminal() {
            return Err(PhaseError::InvalidTransition {
                workflow_id: workflow_id.to_string(),
                from: state.phase,
                to: state.phase,
            });
        }

        state.progress = progress;
        if current_action.is_some() {
            state.current_action = current_action;
        }
        state.updated_at = Utc::now();
        Ok(state.clone())
    }

    /// Record the last checkpoint of a tracked workflow
    pub fn checkpoint(
        &self,
        workflow_id: &str,
        checkpoint_id: impl Into<String>,
    ) -> Result<PhaseState, PhaseError> {
        let mut states = self.states.write();
        let state = states
            .get_mut(workflow_id)
            .ok_or_else(|| PhaseError::NotFound(workflow_id.to_string()))?;
        state.checkpoint_id = Some(checkpoint_id.into());
        state.updated_at = Utc::now();
        Ok(state.clone())
    }

    pub fn get(&self, workflow_id: &str) -> Option<PhaseState> {
        self.states.read().get(workflow_id).cloned()
    }

    /// Non-terminal workflows, ordered by identifier
    pub fn active_workflows(&self) -> Vec<PhaseState> {
        let mut active: Vec<PhaseState> = self
            .states
            .read()
            .values()
            .filter(|s| !s.phase.is_terminal())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        active
    }

    /// Stop tracking a workflow
    pub fn remove(&self, workflow_id: &str) -> Option<PhaseState> {
        self.states.write().remove(workflow_id)
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    fn notify(&self, change: &PhaseChange) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_phase_change(change);
        }
    }
}

impl fmt::Debug for PhaseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseManager")
            .field("workflows", &self.len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

// ============================================================================
// Audit
// ============================================================================

/// Appends one [`AuditEvent`] per phase change to an [`EventSink`].
///
/// Appends run on the current tokio runtime; changes reported outside a
/// runtime are logged and skipped.
pub struct PhaseAuditListener {
    sink: Arc<dyn EventSink>,
}

impl PhaseAuditListener {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }
}

impl PhaseListener for PhaseAuditListener {
    fn on_phase_change(&self, change: &PhaseChange) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(workflow_id = %change.workflow_id, "no runtime, phase audit event skipped");
            return;
        };

        let event = AuditEvent::new(
            PHASE_CHANGED_EVENT,
            change.workflow_id.clone(),
            json!({
                "from": change.from,
                "to": change.to,
                "checkpointId": change.checkpoint_id,
                "reason": change.reason,
            }),
        );
        let sink = Arc::clone(&self.sink);
        runtime.spawn(async move {
            if let Err(e) = sink.append(event).await {
                warn!(error = %e, "failed to append phase audit event");
            } else {
                debug!("phase audit event appended");
            }
        });
    }
}
