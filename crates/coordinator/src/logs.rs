//! Log forwarding
//!
//! [`LogForwarder`] buffers [`LogEntry`]s and ships them to the hub as one
//! `logs` message per flush. A flush happens when `max_batch_size` entries
//! are buffered, on [`flush`](LogForwarder::flush), or every
//! `flush_interval`. While the hub is unreachable entries stay buffered up to
//! `max_buffered`; past that the oldest are dropped.
//!
//! [`LogForwardingLayer`] feeds the forwarder from `tracing` events.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use schemaflow_core::duration_millis;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::coordinator::CoordinatorHandle;
use crate::protocol::{MessageType, WsMessage};

/// One forwarded log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
}

impl LogEntry {
    pub fn new(level: Level, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: level.to_string().to_lowercase(),
            target: target.into(),
            message: message.into(),
            workflow_id: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// `logs` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogsPayload {
    pub entries: Vec<LogEntry>,

    /// Entries dropped since the previous batch
    #[serde(default)]
    pub dropped: u64,
}

/// Forwarder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogForwarderConfig {
    /// Buffered entries that trigger an immediate flush
    pub max_batch_size: usize,

    #[serde(with = "duration_millis")]
    pub flush_interval: Duration,

    /// Hard cap on buffered entries; oldest are dropped beyond it
    pub max_buffered: usize,
}

impl Default for LogForwarderConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            flush_interval: Duration::from_secs(5),
            max_buffered: 10_000,
        }
    }
}

impl LogForwarderConfig {
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_max_buffered(mut self, max: usize) -> Self {
        self.max_buffered = max;
        self
    }
}

/// Buffers log entries and sends them in batches
pub struct LogForwarder {
    config: LogForwarderConfig,
    handle: CoordinatorHandle,
    buffer: Mutex<VecDeque<LogEntry>>,
    dropped: AtomicU64,
    flush_requested: Notify,
}

impl LogForwarder {
    pub fn new(config: LogForwarderConfig, handle: CoordinatorHandle) -> Self {
        Self {
            config,
            handle,
            buffer: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            flush_requested: Notify::new(),
        }
    }

    pub fn config(&self) -> &LogForwarderConfig {
        &self.config
    }

    /// Buffer an entry; never blocks on the network
    pub fn push(&self, entry: LogEntry) {
        let len = {
            let mut buffer = self.buffer.lock();
            let cap = self.config.max_buffered.max(1);
            while buffer.len() >= cap {
                buffer.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            buffer.push_back(entry);
            buffer.len()
        };

        if len >= self.config.max_batch_size.max(1) {
            self.flush_requested.notify_one();
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Entries dropped and not yet reported in a batch
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Send everything buffered as one `logs` message.
    ///
    /// Returns the number of entries sent. Nothing leaves the buffer while
    /// the hub is disconnected.
    pub fn flush(&self) -> usize {
        if !self.handle.is_connected() {
            return 0;
        }

        let entries: Vec<LogEntry> = self.buffer.lock().drain(..).collect();
        if entries.is_empty() {
            return 0;
        }

        let count = entries.len();
        let payload = LogsPayload {
            entries,
            dropped: self.dropped.swap(0, Ordering::Relaxed),
        };
        // A failed send loses the batch and the drop count it carried
        let lost = payload.dropped + count as u64;
        match WsMessage::with_payload(MessageType::Logs, &payload) {
            Ok(message) => {
                if !self.handle.send(message).is_queued() {
                    self.dropped.fetch_add(lost, Ordering::Relaxed);
                    return 0;
                }
                count
            }
            Err(_) => {
                self.dropped.fetch_add(lost, Ordering::Relaxed);
                0
            }
        }
    }

    /// Flush on the interval or when a batch fills, until `shutdown`;
    /// flushes once more on the way out
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.flush_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = self.flush_requested.notified() => {}
                }
                self.flush();
            }

            self.flush();
        })
    }
}

impl fmt::Debug for LogForwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogForwarder")
            .field("config", &self.config)
            .field("buffered", &self.buffered())
            .field("dropped", &self.dropped())
            .finish()
    }
}

// ============================================================================
// Tracing layer
// ============================================================================

/// `tracing` layer that pushes events into a [`LogForwarder`].
///
/// Events from this crate are skipped so forwarding never feeds on itself.
pub struct LogForwardingLayer {
    forwarder: Arc<LogForwarder>,
    min_level: Level,
}

impl LogForwardingLayer {
    pub fn new(forwarder: Arc<LogForwarder>) -> Self {
        Self {
            forwarder,
            min_level: Level::INFO,
        }
    }

    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }
}

impl<S: Subscriber> Layer<S> for LogForwardingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // Level ordering: TRACE > DEBUG > INFO > WARN > ERROR
        if *metadata.level() > self.min_level
            || metadata.target().starts_with(env!("CARGO_CRATE_NAME"))
        {
            return;
        }

        let mut visitor = EntryVisitor::default();
        event.record(&mut visitor);

        let mut entry = LogEntry::new(*metadata.level(), metadata.target(), visitor.message);
        entry.fields = visitor.fields;
        if let Some(Value::String(id)) = entry.fields.remove("workflow_id") {
            entry.workflow_id = Some(id);
        }
        self.forwarder.push(entry);
    }
}

#[derive(Default)]
struct EntryVisitor {
    message: String,
    fields: BTreeMap<String, Value>,
}

impl EntryVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for EntryVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::from(format!("{value:?}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ServiceIdentity;
    use tracing_subscriber::layer::SubscriberExt;

    fn forwarder(config: LogForwarderConfig) -> (Arc<LogForwarder>, CoordinatorHandle) {
        let handle = CoordinatorHandle::new(ServiceIdentity::new("runner", "runner-1"));
        (Arc::new(LogForwarder::new(config, handle.clone())), handle)
    }

    fn entry(message: &str) -> LogEntry {
        LogEntry::new(Level::INFO, "app", message)
    }

    #[test]
    fn test_flush_sends_one_batch() {
        let (forwarder, handle) = forwarder(LogForwarderConfig::default());
        let mut outbound = handle.attach(8);

        forwarder.push(entry("one"));
        forwarder.push(entry("two").with_workflow_id("wf"));
        assert_eq!(forwarder.flush(), 2);
        assert_eq!(forwarder.flush(), 0);

        let message = outbound.try_recv().unwrap();
        assert_eq!(message.message_type, MessageType::Logs);
        let payload: LogsPayload = message.payload_as().unwrap();
        assert_eq!(payload.entries.len(), 2);
        assert_eq!(payload.entries[1].workflow_id.as_deref(), Some("wf"));
        assert!(outbound.try_recv().is_err());
    }

    #[test]
    fn test_buffer_kept_while_disconnected_and_capped() {
        let (forwarder, handle) =
            forwarder(LogForwarderConfig::default().with_max_buffered(3));

        for i in 0..5 {
            forwarder.push(entry(&format!("line {i}")));
        }
        assert_eq!(forwarder.flush(), 0);
        assert_eq!(forwarder.buffered(), 3);
        assert_eq!(forwarder.dropped(), 2);

        let mut outbound = handle.attach(8);
        assert_eq!(forwarder.flush(), 3);
        let payload: LogsPayload = outbound.try_recv().unwrap().payload_as().unwrap();
        assert_eq!(payload.entries[0].message, "line 2");
        assert_eq!(payload.dropped, 2);
        assert_eq!(forwarder.dropped(), 0);
    }

    #[test]
    fn test_failed_flush_keeps_earlier_drop_count() {
        let (forwarder, handle) =
            forwarder(LogForwarderConfig::default().with_max_buffered(3));

        for i in 0..5 {
            forwarder.push(entry(&format!("line {i}")));
        }
        assert_eq!(forwarder.dropped(), 2);

        let mut outbound = handle.attach(1);
        assert!(handle.send(WsMessage::ping()).is_queued());
        assert_eq!(forwarder.flush(), 0);
        assert_eq!(forwarder.buffered(), 0);
        assert_eq!(forwarder.dropped(), 5);

        outbound.try_recv().unwrap();
        forwarder.push(entry("after"));
        assert_eq!(forwarder.flush(), 1);
        let payload: LogsPayload = outbound.try_recv().unwrap().payload_as().unwrap();
        assert_eq!(payload.dropped, 5);
        assert_eq!(forwarder.dropped(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_flush_on_batch_size_and_interval() {
        let config = LogForwarderConfig::default()
            .with_max_batch_size(2)
            .with_flush_interval(Duration::from_secs(5));
        let (forwarder, handle) = forwarder(config);
        let mut outbound = handle.attach(8);
        let shutdown = CancellationToken::new();
        let task = Arc::clone(&forwarder).spawn(shutdown.clone());

        // Let the immediate first tick pass
        tokio::task::yield_now().await;

        forwarder.push(entry("a"));
        forwarder.push(entry("b"));
        let batch: LogsPayload = outbound.recv().await.unwrap().payload_as().unwrap();
        assert_eq!(batch.entries.len(), 2);

        forwarder.push(entry("c"));
        tokio::time::sleep(Duration::from_secs(6)).await;
        let batch: LogsPayload = outbound.recv().await.unwrap().payload_as().unwrap();
        assert_eq!(batch.entries[0].message, "c");

        forwarder.push(entry("d"));
        shutdown.cancel();
        task.await.unwrap();
        let batch: LogsPayload = outbound.recv().await.unwrap().payload_as().unwrap();
        assert_eq!(batch.entries[0].message, "d");
    }

    #[test]
    fn test_layer_captures_fields_and_skips_own_target() {
        let (forwarder, _handle) = forwarder(LogForwarderConfig::default());
        let subscriber = tracing_subscriber::registry()
            .with(LogForwardingLayer::new(Arc::clone(&forwarder)));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "app", workflow_id = "wf-9", attempt = 2, "action started");
            tracing::debug!(target: "app", "too verbose");
            tracing::warn!("from the coordinator itself");
        });

        let entries: Vec<LogEntry> = forwarder.buffer.lock().iter().cloned().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "action started");
        assert_eq!(entries[0].level, "info");
        assert_eq!(entries[0].workflow_id.as_deref(), Some("wf-9"));
        assert_eq!(entries[0].fields["attempt"], 2);
    }
}
