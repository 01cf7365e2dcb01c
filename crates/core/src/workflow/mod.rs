//! Workflow compiler
//!
//! - [`parser`] turns a JSON-LD document into a [`WorkflowDefinition`]
//! - [`expander`] turns a definition into concrete action instances for one run
//! - [`observer`] receives structured expansion events

pub mod definition;
pub mod document;
pub mod expander;
pub mod observer;
pub mod parser;

pub use definition::{
    LoopDefinition, LoopItem, WorkflowAction, WorkflowDefinition, WorkflowKind,
    DEFAULT_MAX_ITERATIONS,
};
pub use document::{normalize_type, DocumentType};
pub use expander::{
    original_id, prefixed_id, ExpandedRun, ExpanderConfig, ExpansionError, WorkflowExpander,
};
pub use observer::{
    ExpansionEvent, ExpansionObserver, NoopObserver, RecordingObserver, TracingObserver,
};
pub use parser::{parse_workflow, parse_workflow_str, parse_workflow_value, ParseError};
