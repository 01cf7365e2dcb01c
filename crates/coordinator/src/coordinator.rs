//! Hub coordinator
//!
//! One reconnect loop per coordinator. Each connection runs three duties:
//!
//! - read loop: decodes inbound envelopes in arrival order and routes them
//!   through the handler table
//! - send worker: drains the bounded outbound queue into the connection
//! - heartbeat: enqueues a `ping` every `heartbeat_interval`
//!
//! Registration is written directly before the send worker starts, so every
//! later frame goes through the queue and keeps caller order. When the queue
//! is full or no connection is up, messages are dropped and counted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::ReconnectBackoff;
use crate::config::CoordinatorConfig;
use crate::handlers::{default_handlers, HandlerContext, HandlerTable, MessageHandler};
use crate::phase::{PhaseChange, PhaseListener, PhaseManager};
use crate::protocol::{
    CheckpointPayload, ErrorPayload, MessageType, PhaseChangedPayload, ProgressPayload,
    RegisterPayload, WsMessage,
};
use crate::transport::{BoxConnection, Connector, ServiceIdentity, TransportError};

/// Upper bound on flushing queued messages when a connection closes
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Coordinator errors
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("coordinator is already running")]
    AlreadyRunning,

    #[error("gave up after {attempts} reconnect attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

// ============================================================================
// Connection events
// ============================================================================

/// Connection lifecycle notifications.
///
/// Per connection, listeners see `Connected`, then at most one
/// `Registered`, then exactly one `Disconnected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected { target: String },
    Registered,
    Disconnected { reason: String },
}

pub trait ConnectionListener: Send + Sync {
    fn on_connection_event(&self, event: &ConnectionEvent);
}

/// Outcome of a best-effort send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Queued,
    /// Outbound queue full
    QueueFull,
    /// No live connection
    Disconnected,
    /// Payload could not be encoded
    Rejected,
}

impl SendStatus {
    pub fn is_queued(&self) -> bool {
        matches!(self, SendStatus::Queued)
    }
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub dropped_queue_full: u64,
    pub dropped_disconnected: u64,
    pub handler_errors: u64,
    pub connections: u64,
    pub failed_attempts: u64,
}

impl CoordinatorStats {
    pub fn dropped(&self) -> u64 {
        self.dropped_queue_full + self.dropped_disconnected
    }
}

#[derive(Default)]
struct Counters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    dropped_queue_full: AtomicU64,
    dropped_disconnected: AtomicU64,
    handler_errors: AtomicU64,
    connections: AtomicU64,
    failed_attempts: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
            dropped_disconnected: self.dropped_disconnected.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    identity: ServiceIdentity,
    outbound: RwLock<Option<mpsc::Sender<WsMessage>>>,
    connected: AtomicBool,
    registered: AtomicBool,
    counters: Counters,
    listeners: RwLock<Vec<Arc<dyn ConnectionListener>>>,
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable entry point for sending to the hub
#[derive(Clone)]
pub struct CoordinatorHandle {
    shared: Arc<Shared>,
}

impl CoordinatorHandle {
    pub(crate) fn new(identity: ServiceIdentity) -> Self {
        Self {
            shared: Arc::new(Shared {
                identity,
                outbound: RwLock::new(None),
                connected: AtomicBool::new(false),
                registered: AtomicBool::new(false),
                counters: Counters::default(),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.shared.identity
    }

    /// Enqueue a message. Never blocks; drops are counted in [`stats`](Self::stats).
    pub fn send(&self, message: WsMessage) -> SendStatus {
        let outbound = self.shared.outbound.read();
        let Some(sender) = outbound.as_ref() else {
            Counters::bump(&self.shared.counters.dropped_disconnected);
            debug!(message_type = %message.message_type, "not connected, message dropped");
            return SendStatus::Disconnected;
        };

        match sender.try_send(message) {
            Ok(()) => SendStatus::Queued,
            Err(TrySendError::Full(message)) => {
                Counters::bump(&self.shared.counters.dropped_queue_full);
                warn!(message_type = %message.message_type, "send queue full, message dropped");
                SendStatus::QueueFull
            }
            Err(TrySendError::Closed(message)) => {
                Counters::bump(&self.shared.counters.dropped_disconnected);
                debug!(message_type = %message.message_type, "connection closing, message dropped");
                SendStatus::Disconnected
            }
        }
    }

    pub fn report_progress(
        &self,
        workflow_id: &str,
        progress: f64,
        current_action: Option<String>,
    ) -> SendStatus {
        let payload = ProgressPayload {
            workflow_id: workflow_id.to_string(),
            progress,
            current_action,
        };
        self.send_typed(MessageType::Progress, Some(workflow_id), &payload)
    }

    pub fn report_error(
        &self,
        workflow_id: Option<&str>,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> SendStatus {
        let payload = ErrorPayload {
            workflow_id: workflow_id.map(str::to_string),
            code: code.into(),
            message: message.into(),
            details,
        };
        self.send_typed(MessageType::Error, workflow_id, &payload)
    }

    pub fn send_checkpoint(
        &self,
        workflow_id: &str,
        checkpoint_id: impl Into<String>,
        data: Option<Value>,
    ) -> SendStatus {
        let payload = CheckpointPayload {
            workflow_id: workflow_id.to_string(),
            checkpoint_id: checkpoint_id.into(),
            data,
        };
        self.send_typed(MessageType::Checkpoint, Some(workflow_id), &payload)
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.shared.counters.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_registered(&self) -> bool {
        self.shared.registered.load(Ordering::SeqCst)
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.shared.listeners.write().push(listener);
    }

    fn send_typed<T: Serialize>(
        &self,
        message_type: MessageType,
        workflow_id: Option<&str>,
        payload: &T,
    ) -> SendStatus {
        match WsMessage::with_payload(message_type, payload) {
            Ok(mut message) => {
                message.workflow_id = workflow_id.map(str::to_string);
                self.send(message)
            }
            Err(e) => {
                warn!(error = %e, "failed to encode payload");
                SendStatus::Rejected
            }
        }
    }

    /// Open a fresh outbound queue and mark the handle connected
    pub(crate) fn attach(&self, capacity: usize) -> mpsc::Receiver<WsMessage> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        *self.shared.outbound.write() = Some(sender);
        self.shared.connected.store(true, Ordering::SeqCst);
        receiver
    }

    pub(crate) fn detach(&self) {
        *self.shared.outbound.write() = None;
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.registered.store(false, Ordering::SeqCst);
    }

    /// Returns true on the first acknowledgment for this connection
    fn mark_registered(&self) -> bool {
        !self.shared.registered.swap(true, Ordering::SeqCst)
    }

    fn emit(&self, event: ConnectionEvent) {
        let listeners = self.shared.listeners.read().clone();
        for listener in listeners {
            listener.on_connection_event(&event);
        }
    }
}

impl std::fmt::Debug for CoordinatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorHandle")
            .field("service_id", &self.shared.identity.service_id)
            .field("connected", &self.is_connected())
            .field("registered", &self.is_registered())
            .finish()
    }
}

/// Forwards phase changes to the hub as `phase_changed`
struct PhaseReporter {
    handle: CoordinatorHandle,
}

impl PhaseListener for PhaseReporter {
    fn on_phase_change(&self, change: &PhaseChange) {
        let payload = PhaseChangedPayload {
            workflow_id: change.workflow_id.clone(),
            from: change.from,
            to: change.to,
            checkpoint_id: change.checkpoint_id.clone(),
            reason: change.reason.clone(),
        };
        self.handle
            .send_typed(MessageType::PhaseChanged, Some(&change.workflow_id), &payload);
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Keeps a hub connection alive and translates phase events to and from it
///
/// # Example
///
/// ```ignore
/// use schemaflow_coordinator::prelude::*;
///
/// let phases = Arc::new(PhaseManager::new());
/// let coordinator = Coordinator::new(
///     CoordinatorConfig::from_env()?,
///     Arc::new(TcpConnector::new("127.0.0.1:7400")),
///     phases.clone(),
/// );
///
/// let shutdown = CancellationToken::new();
/// tokio::spawn({
///     let shutdown = shutdown.clone();
///     async move { coordinator.run(shutdown).await }
/// });
///
/// phases.start("nightly-backup")?; // reported as phase_changed
/// ```
pub struct Coordinator {
    config: CoordinatorConfig,
    connector: Arc<dyn Connector>,
    context: HandlerContext,
    handlers: HandlerTable,
    running: AtomicBool,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        connector: Arc<dyn Connector>,
        phases: Arc<PhaseManager>,
    ) -> Self {
        let handle = CoordinatorHandle::new(config.identity());
        phases.add_listener(Arc::new(PhaseReporter {
            handle: handle.clone(),
        }));

        Self {
            config,
            connector,
            context: HandlerContext { phases, handle },
            handlers: default_handlers(),
            running: AtomicBool::new(false),
        }
    }

    /// Register or replace the handler for a message type
    pub fn with_handler(
        mut self,
        message_type: impl Into<MessageType>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        self.handlers.insert(message_type.into(), handler);
        self
    }

    pub fn with_listener(self, listener: Arc<dyn ConnectionListener>) -> Self {
        self.context.handle.add_listener(listener);
        self
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.context.handle.clone()
    }

    pub fn phases(&self) -> &Arc<PhaseManager> {
        &self.context.phases
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run the reconnect loop until `shutdown` is cancelled or the attempt
    /// ceiling is reached
    #[instrument(skip_all, fields(service_id = %self.config.service_id, target = %self.connector.target()))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), CoordinatorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CoordinatorError::AlreadyRunning);
        }
        info!("starting coordinator");

        let result = self.reconnect_loop(&shutdown).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn reconnect_loop(&self, shutdown: &CancellationToken) -> Result<(), CoordinatorError> {
        let mut backoff = ReconnectBackoff::new(self.config.reconnect.clone());

        loop {
            let attempt = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                attempt = self.connect() => attempt,
            };

            let last_error = match attempt {
                Ok(connection) => {
                    backoff.reset();
                    let reason = self.serve(connection, shutdown).await;
                    if shutdown.is_cancelled() {
                        break;
                    }
                    reason
                }
                Err(e) => {
                    Counters::bump(&self.context.handle.shared.counters.failed_attempts);
                    warn!(
                        attempt = backoff.attempts() + 1,
                        error = %e,
                        "connection attempt failed"
                    );
                    e.to_string()
                }
            };

            let Some(delay) = backoff.next_delay() else {
                error!(attempts = backoff.attempts(), "reconnect attempts exhausted");
                return Err(CoordinatorError::RetriesExhausted {
                    attempts: backoff.attempts(),
                    last_error,
                });
            };

            debug!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("coordinator stopped");
        Ok(())
    }

    /// Dial and register
    async fn connect(&self) -> Result<BoxConnection, TransportError> {
        let handle = &self.context.handle;
        let mut connection = tokio::time::timeout(
            self.config.connect_timeout,
            self.connector.connect(handle.identity()),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            addr: self.connector.target(),
            after: self.config.connect_timeout,
        })??;

        let register = WsMessage::with_payload(
            MessageType::Register,
            &RegisterPayload {
                service_name: self.config.service_name.clone(),
                service_id: self.config.service_id.clone(),
                capabilities: self.config.capabilities.clone(),
                version: self.config.version.clone(),
            },
        )?;
        connection.send(register.to_json()?).await?;
        Counters::bump(&handle.shared.counters.messages_sent);

        Ok(connection)
    }

    /// Serve one connection until it fails or shutdown; returns the reason
    async fn serve(&self, connection: BoxConnection, shutdown: &CancellationToken) -> String {
        let handle = &self.context.handle;
        let (sink, mut stream) = connection.split();
        let outbound = handle.attach(self.config.send_queue_capacity);

        Counters::bump(&handle.shared.counters.connections);
        info!("connected to hub");
        handle.emit(ConnectionEvent::Connected {
            target: self.connector.target(),
        });

        let token = shutdown.child_token();
        let send_task = tokio::spawn(send_loop(sink, outbound, token.clone(), handle.clone()));
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            handle.clone(),
            self.config.heartbeat_interval,
            token.clone(),
        ));

        let reason = loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let reason = if shutdown.is_cancelled() { "shutdown" } else { "send failed" };
                    break reason.to_string();
                }
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.dispatch(&text).await,
                    Some(Err(e)) => break format!("read failed: {e}"),
                    None => break "connection closed by hub".to_string(),
                },
            }
        };

        token.cancel();
        handle.detach();
        for (name, task) in [("send", send_task), ("heartbeat", heartbeat_task)] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "connection task ended abnormally");
            }
        }

        info!(reason = %reason, "disconnected from hub");
        handle.emit(ConnectionEvent::Disconnected {
            reason: reason.clone(),
        });
        reason
    }

    /// Decode and route one inbound frame
    async fn dispatch(&self, frame: &str) {
        let handle = &self.context.handle;
        let message = match WsMessage::from_json(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "discarding malformed frame");
                return;
            }
        };
        Counters::bump(&handle.shared.counters.messages_received);

        if message.message_type == MessageType::Registered && handle.mark_registered() {
            info!("registered with hub");
            handle.emit(ConnectionEvent::Registered);
        }

        let Some(handler) = self.handlers.get(&message.message_type) else {
            debug!(message_type = %message.message_type, "no handler registered, message ignored");
            return;
        };

        if let Err(e) = handler.handle(&self.context, &message).await {
            Counters::bump(&handle.shared.counters.handler_errors);
            warn!(
                message_type = %message.message_type,
                message_id = %message.id,
                error = %e,
                "message handler failed"
            );
        }
    }
}

async fn send_loop(
    mut sink: SplitSink<BoxConnection, String>,
    mut outbound: mpsc::Receiver<WsMessage>,
    token: CancellationToken,
    handle: CoordinatorHandle,
) {
    let mut healthy = true;
    loop {
        let message = tokio::select! {
            _ = token.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if let Err(e) = write_message(&mut sink, &message, &handle).await {
            warn!(error = %e, "send failed, closing connection");
            token.cancel();
            healthy = false;
            break;
        }
    }

    if healthy {
        // Whatever was queued before the connection closed still goes out
        let drain = async {
            while let Ok(message) = outbound.try_recv() {
                if write_message(&mut sink, &message, &handle).await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            debug!("outbound drain timed out");
        }
    }

    if let Err(e) = sink.close().await {
        debug!(error = %e, "error closing connection");
    }
    debug!("send loop exited");
}

async fn write_message(
    sink: &mut SplitSink<BoxConnection, String>,
    message: &WsMessage,
    handle: &CoordinatorHandle,
) -> Result<(), TransportError> {
    let frame = message.to_json()?;
    sink.send(frame).await?;
    Counters::bump(&handle.shared.counters.messages_sent);
    Ok(())
}

async fn heartbeat_loop(handle: CoordinatorHandle, interval: Duration, token: CancellationToken) {
    if interval.is_zero() {
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                handle.send(WsMessage::ping());
            }
        }
    }

    debug!("heartbeat loop exited");
}
