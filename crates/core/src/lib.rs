//! # SchemaFlow Core
//!
//! Workflow compiler and execution abstractions for JSON-LD / schema.org
//! flavoured workflow documents.
//!
//! ## Features
//!
//! - **Action model**: typed actions with status, schedule and control metadata
//! - **Parser**: `ItemList`, `HowTo`, `ScheduledAction` and `MapAction` documents
//! - **Expander**: flat, run-namespaced action instances with resolved dependencies
//! - **Executors**: ordered registry with HTTP and shell command reference backends
//! - **Dispatch**: persistence, publishing and auditing through narrow contracts
//!
//! ## Architecture
//!
//! ```text
//! JSON-LD document
//!        │  parse_workflow
//!        ▼
//! WorkflowDefinition ──► WorkflowExpander ──► ExpandedRun
//!                                                  │
//!                          ┌───────────────────────┴──────────┐
//!                          ▼                                  ▼
//!                   ExecutorRegistry                     RunDispatcher
//!              (first matching Executor)      (DocumentStore, MessagePublisher,
//!                                                         EventSink)
//! ```
//!
//! ## Example
//!
//! ```
//! use schemaflow_core::prelude::*;
//!
//! let definition = parse_workflow_str(r#"{
//!     "@type": "ItemList",
//!     "identifier": "media",
//!     "itemListElement": [
//!         {"@type": "ListItem", "item": {"@type": "CreateAction", "identifier": "render"}},
//!         {"@type": "ListItem", "item": {"@type": "ShareAction", "identifier": "publish",
//!                                        "requires": ["render"]}}
//!     ]
//! }"#).unwrap();
//!
//! let run = WorkflowExpander::default().expand(&definition).unwrap();
//! assert_eq!(run.actions.len(), 2);
//! assert_eq!(run.actions[1].requires, vec![prefixed_id(run.run_id, "render")]);
//! ```

pub mod action;
pub mod dispatch;
pub mod executor;
pub mod ports;
pub mod reliability;
pub mod workflow;

// Re-export main types at crate root
pub use action::{
    ActionStatus, BackoffStrategy, ControlMetadata, Schedule, SemanticAction,
    SemanticScheduledAction,
};
pub use dispatch::{DispatchError, DispatchReport, DispatcherConfig, RunDispatcher};
pub use executor::{
    CommandExecutor, ExecutionContext, ExecutionError, ExecutionHooks, ExecutionResult,
    ExecutionStatus, Executor, ExecutorRegistry, HttpExecutor, HttpExecutorConfig,
};
pub use reliability::RetryPolicy;
pub use workflow::{
    parse_workflow, parse_workflow_str, parse_workflow_value, prefixed_id, ExpandedRun,
    ExpanderConfig, ExpansionError, ExpansionObserver, ParseError, WorkflowAction,
    WorkflowDefinition, WorkflowExpander, WorkflowKind,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::action::{
        ActionStatus, BackoffStrategy, ControlMetadata, SemanticAction, SemanticScheduledAction,
    };
    pub use crate::executor::{
        ExecutionContext, ExecutionError, ExecutionResult, ExecutionStatus, Executor,
        ExecutorRegistry,
    };
    pub use crate::workflow::{
        parse_workflow, parse_workflow_str, parse_workflow_value, prefixed_id, ExpandedRun,
        ExpansionError, ParseError, WorkflowAction, WorkflowDefinition, WorkflowExpander,
    };
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{json, Value};
}

/// Serde support for `Duration` as milliseconds
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
