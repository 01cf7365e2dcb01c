//! Run dispatch
//!
//! Hands an [`ExpandedRun`] to the external collaborators: every instance is
//! persisted, enabled instances are published for scheduling, and one
//! audit event records the dispatch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::ports::{AuditEvent, DocumentStore, EventSink, Message, MessagePublisher, StoreError};
use crate::workflow::ExpandedRun;

/// Audit event type appended after a run is dispatched
pub const RUN_DISPATCHED_EVENT: &str = "run.dispatched";

/// Errors raised while dispatching a run
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to save action {action_id}: {source}")]
    Save {
        action_id: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to publish action {action_id}: {source}")]
    Publish {
        action_id: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to record audit event: {0}")]
    Audit(#[source] StoreError),

    #[error("failed to serialize action {action_id}: {source}")]
    Serialization {
        action_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Collection that receives action instances
    pub collection: String,

    /// Topic enabled instances are published on
    pub topic: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            collection: "actions".to_string(),
            topic: "actions.scheduled".to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }
}

/// Summary of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub saved: usize,
    pub published: usize,
    /// Disabled instances: saved but not published
    pub skipped: usize,
}

/// Persists and publishes expanded runs
pub struct RunDispatcher {
    store: Arc<dyn DocumentStore>,
    publisher: Arc<dyn MessagePublisher>,
    events: Arc<dyn EventSink>,
    config: DispatcherConfig,
}

impl RunDispatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        publisher: Arc<dyn MessagePublisher>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            publisher,
            events,
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Save every instance, publish enabled ones, then append the audit event
    #[tracing::instrument(skip_all, fields(run_id = %run.run_id, workflow_id = %run.workflow_id))]
    pub async fn dispatch(&self, run: &ExpandedRun) -> Result<DispatchReport, DispatchError> {
        let mut report = DispatchReport::default();

        for action in &run.actions {
            let action_id = action.identifier().to_string();
            let document =
                serde_json::to_value(action).map_err(|source| DispatchError::Serialization {
                    action_id: action_id.clone(),
                    source,
                })?;

            self.store
                .save(&self.config.collection, &action_id, document.clone())
                .await
                .map_err(|source| DispatchError::Save {
                    action_id: action_id.clone(),
                    source,
                })?;
            report.saved += 1;

            if !action.is_enabled() {
                tracing::debug!(action_id = %action_id, "action disabled, not publishing");
                report.skipped += 1;
                continue;
            }

            let message = Message::new(
                self.config.topic.clone(),
                json!({
                    "runId": run.run_id,
                    "workflowId": run.workflow_id,
                    "action": document,
                }),
            )
            .with_key(action_id.clone())
            .with_header("action-type", action.action_type());

            self.publisher
                .publish(message)
                .await
                .map_err(|source| DispatchError::Publish { action_id, source })?;
            report.published += 1;
        }

        self.events
            .append(AuditEvent::new(
                RUN_DISPATCHED_EVENT,
                run.run_id.to_string(),
                json!({
                    "workflowId": run.workflow_id,
                    "actions": report.saved,
                    "published": report.published,
                    "skipped": report.skipped,
                }),
            ))
            .await
            .map_err(DispatchError::Audit)?;

        tracing::info!(
            saved = report.saved,
            published = report.published,
            skipped = report.skipped,
            "run dispatched"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ControlMetadata, SemanticScheduledAction};
    use crate::ports::{InMemoryDocumentStore, InMemoryEventSink, InMemoryPublisher};
    use crate::workflow::{WorkflowAction, WorkflowDefinition, WorkflowExpander, WorkflowKind};
    use async_trait::async_trait;

    struct FailingPublisher;

    #[async_trait]
    impl MessagePublisher for FailingPublisher {
        async fn publish(&self, _message: Message) -> Result<(), StoreError> {
            Err(StoreError::Backend("broker down".into()))
        }
    }

    fn run() -> ExpandedRun {
        let disabled = SemanticScheduledAction::new("Action", "off")
            .with_control(ControlMetadata::new().with_enabled(false));
        let definition = WorkflowDefinition::new("wf", WorkflowKind::List)
            .with_action(WorkflowAction::single(
                SemanticScheduledAction::new("Action", "on"),
                vec![],
            ))
            .with_action(WorkflowAction::single(disabled, vec![]));
        WorkflowExpander::default().expand(&definition).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_saves_publishes_and_audits() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let publisher = Arc::new(InMemoryPublisher::new());
        let events = Arc::new(InMemoryEventSink::new());
        let dispatcher = RunDispatcher::new(store.clone(), publisher.clone(), events.clone());

        let run = run();
        let report = dispatcher.dispatch(&run).await.unwrap();

        assert_eq!(
            report,
            DispatchReport {
                saved: 2,
                published: 1,
                skipped: 1
            }
        );
        assert_eq!(store.count("actions"), 2);

        let messages = publisher.messages_for("actions.scheduled");
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].key.as_deref(),
            Some(run.find("on").unwrap().identifier())
        );

        let audit = events.events_of_type(RUN_DISPATCHED_EVENT);
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].subject, run.run_id.to_string());
        assert_eq!(audit[0].data["skipped"], 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let events = Arc::new(InMemoryEventSink::new());
        let dispatcher = RunDispatcher::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(FailingPublisher),
            events.clone(),
        )
        .with_config(DispatcherConfig::default().with_topic("custom"));

        let err = dispatcher.dispatch(&run()).await.unwrap_err();

        assert!(matches!(err, DispatchError::Publish { .. }));
        assert!(events.events().is_empty());
    }
}
