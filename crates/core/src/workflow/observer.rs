// Expansion observers
//
// The expander reports what it does through an injected ExpansionObserver
// instead of writing to stderr, so callers decide where the events go and
// tests can assert on them directly.

use parking_lot::Mutex;
use uuid::Uuid;

// ============================================================================
// ExpansionEvent
// ============================================================================

/// Structured event emitted during expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpansionEvent {
    /// Expansion of a workflow started with a fresh run identifier
    RunStarted {
        run_id: Uuid,
        workflow_id: String,
        actions: usize,
    },
    /// One concrete instance was produced
    ActionExpanded {
        run_id: Uuid,
        source_id: String,
        instance_id: String,
        dependencies: usize,
    },
    /// A loop produced one instance per item
    LoopExpanded {
        run_id: Uuid,
        loop_id: String,
        iterations: usize,
    },
    /// A loop exceeded its iteration bound
    LoopLimitExceeded {
        run_id: Uuid,
        loop_id: String,
        items: usize,
        limit: usize,
    },
    /// All instances were produced
    RunCompleted {
        run_id: Uuid,
        workflow_id: String,
        instances: usize,
    },
    /// Expansion failed; no instances were produced
    RunFailed {
        run_id: Uuid,
        workflow_id: String,
        error: String,
    },
}

impl ExpansionEvent {
    /// Dotted event name, e.g. `expansion.action_expanded`
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "expansion.run_started",
            Self::ActionExpanded { .. } => "expansion.action_expanded",
            Self::LoopExpanded { .. } => "expansion.loop_expanded",
            Self::LoopLimitExceeded { .. } => "expansion.loop_limit_exceeded",
            Self::RunCompleted { .. } => "expansion.run_completed",
            Self::RunFailed { .. } => "expansion.run_failed",
        }
    }
}

// ============================================================================
// ExpansionObserver Trait
// ============================================================================

/// Receives expansion events
///
/// Called synchronously from the expander, so implementations should be
/// cheap and must not block.
pub trait ExpansionObserver: Send + Sync {
    fn on_event(&self, event: &ExpansionEvent);
}

// ============================================================================
// TracingObserver
// ============================================================================

/// Default observer: forwards events to `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingObserver;

impl ExpansionObserver for TracingObserver {
    fn on_event(&self, event: &ExpansionEvent) {
        match event {
            ExpansionEvent::RunStarted {
                run_id,
                workflow_id,
                actions,
            } => {
                tracing::debug!(%run_id, %workflow_id, actions, "expansion started");
            }
            ExpansionEvent::ActionExpanded {
                run_id,
                source_id,
                instance_id,
                dependencies,
            } => {
                tracing::debug!(%run_id, %source_id, %instance_id, dependencies, "action expanded");
            }
            ExpansionEvent::LoopExpanded {
                run_id,
                loop_id,
                iterations,
            } => {
                tracing::debug!(%run_id, %loop_id, iterations, "loop expanded");
            }
            ExpansionEvent::LoopLimitExceeded {
                run_id,
                loop_id,
                items,
                limit,
            } => {
                tracing::warn!(%run_id, %loop_id, items, limit, "loop exceeds iteration limit");
            }
            ExpansionEvent::RunCompleted {
                run_id,
                workflow_id,
                instances,
            } => {
                tracing::debug!(%run_id, %workflow_id, instances, "expansion completed");
            }
            ExpansionEvent::RunFailed {
                run_id,
                workflow_id,
                error,
            } => {
                tracing::warn!(%run_id, %workflow_id, %error, "expansion failed");
            }
        }
    }
}

// ============================================================================
// NoopObserver
// ============================================================================

/// Discards all events
#[derive(Debug, Clone, Default)]
pub struct NoopObserver;

impl ExpansionObserver for NoopObserver {
    fn on_event(&self, _event: &ExpansionEvent) {}
}

// ============================================================================
// RecordingObserver
// ============================================================================

/// Keeps every event in memory, for tests and debugging
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ExpansionEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events
    pub fn events(&self) -> Vec<ExpansionEvent> {
        self.events.lock().clone()
    }

    /// Names of recorded events, in order
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(ExpansionEvent::name).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ExpansionObserver for RecordingObserver {
    fn on_event(&self, event: &ExpansionEvent) {
        self.events.lock().push(event.clone());
    }
}
