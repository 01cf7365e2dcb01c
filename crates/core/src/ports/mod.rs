//! External collaborator contracts and in-memory implementations

mod memory;
mod traits;

pub use memory::{InMemoryDocumentStore, InMemoryEventSink, InMemoryPublisher};
pub use traits::{
    AuditEvent, DocumentFilter, DocumentStore, EventSink, Message, MessagePublisher, StoreError,
};
