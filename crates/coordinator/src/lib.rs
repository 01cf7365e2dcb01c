//! # SchemaFlow Coordinator
//!
//! Keeps a remote coordination hub informed of workflow phases over a
//! long-lived, reconnecting connection, and accepts remote lifecycle
//! commands.
//!
//! ## Features
//!
//! - **Phase state machine**: validated Potential/Active/Paused/terminal transitions
//! - **Protocol**: typed JSON envelopes with correlated replies
//! - **Resilient transport**: exponential reconnect backoff, registration resync
//! - **Backpressure**: bounded, non-blocking outbound queue with drop counters
//! - **Log forwarding**: batched `logs` messages fed from `tracing`
//!
//! ## Architecture
//!
//! ```text
//!  PhaseManager ──PhaseChange──► PhaseReporter ─┐
//!       ▲                                       │ send (try_send)
//!       │ pause/resume/cancel                   ▼
//!  handler table ◄── read loop ◄──┐      outbound queue
//!                                 │             │
//!                             Connection ◄── send worker
//!                                 ▲
//!                      Connector (TCP / channel)
//! ```

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod handlers;
pub mod logs;
pub mod phase;
pub mod protocol;
pub mod telemetry;
pub mod transport;

pub use backoff::{ReconnectBackoff, ReconnectConfig};
pub use config::{ConfigError, CoordinatorConfig};
pub use coordinator::{
    ConnectionEvent, ConnectionListener, Coordinator, CoordinatorError, CoordinatorHandle,
    CoordinatorStats, SendStatus,
};
pub use handlers::{HandlerContext, HandlerError, MessageHandler};
pub use logs::{LogEntry, LogForwarder, LogForwarderConfig, LogForwardingLayer};
pub use phase::{
    Phase, PhaseAuditListener, PhaseChange, PhaseError, PhaseListener, PhaseManager, PhaseState,
};
pub use protocol::{MessageType, WsMessage};
pub use telemetry::{init_telemetry, LogFormat, TelemetryConfig};
pub use transport::{
    ChannelConnector, ChannelHub, Connector, HubConnection, ServiceIdentity, TcpConnector,
    TransportError,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::CoordinatorConfig;
    pub use crate::coordinator::{Coordinator, CoordinatorHandle, SendStatus};
    pub use crate::phase::{Phase, PhaseManager};
    pub use crate::protocol::{MessageType, WsMessage};
    pub use crate::transport::{ChannelConnector, Connector, TcpConnector};
    pub use std::sync::Arc;
    pub use tokio_util::sync::CancellationToken;
}
