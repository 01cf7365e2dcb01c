//! Hub transports
//!
//! A [`Connector`] dials the hub and returns a [`Connection`]: a sink of
//! outbound frames and a stream of inbound frames, one JSON envelope each.
//!
//! - [`TcpConnector`]: newline-delimited JSON over TCP
//! - [`ChannelConnector`]: in-process channels, paired with a [`ChannelHub`]
//!   that plays the hub side in tests and local runs

use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::protocol::WsMessage;

/// Handshake header carrying the service name
pub const SERVICE_NAME_HEADER: &str = "X-Service-Name";
/// Handshake header carrying the service instance id
pub const SERVICE_ID_HEADER: &str = "X-Service-ID";

/// Longest accepted inbound line
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connecting to {addr} timed out after {after:?}")]
    Timeout { addr: String, after: Duration },

    #[error("hub refused connection: {0}")]
    Refused(String),

    #[error("frame error: {0}")]
    Frame(#[from] LinesCodecError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,
}

/// Identity sent with the connection handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub service_name: String,
    pub service_id: String,
}

impl ServiceIdentity {
    pub fn new(service_name: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_id: service_id.into(),
        }
    }

    /// Header pair sent ahead of any protocol message
    pub fn headers(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (SERVICE_NAME_HEADER.to_string(), self.service_name.clone()),
            (SERVICE_ID_HEADER.to_string(), self.service_id.clone()),
        ])
    }
}

/// Bidirectional frame connection
pub trait Connection:
    Sink<String, Error = TransportError> + Stream<Item = Result<String, TransportError>> + Send
{
}

impl<T> Connection for T where
    T: Sink<String, Error = TransportError> + Stream<Item = Result<String, TransportError>> + Send
{
}

pub type BoxConnection = Pin<Box<dyn Connection>>;

/// Dials the hub
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, identity: &ServiceIdentity) -> Result<BoxConnection, TransportError>;

    /// Human-readable target for logs
    fn target(&self) -> String;
}

// ============================================================================
// TCP
// ============================================================================

#[derive(Serialize)]
struct Handshake {
    headers: BTreeMap<String, String>,
}

/// Newline-delimited JSON over TCP.
///
/// The first line written is a handshake `{"headers": {...}}` carrying the
/// service identity; protocol envelopes follow.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, identity: &ServiceIdentity) -> Result<BoxConnection, TransportError> {
        let connect = TcpStream::connect(self.addr.as_str());
        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| TransportError::Timeout {
                addr: self.addr.clone(),
                after: self.connect_timeout,
            })?
            .map_err(|source| TransportError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;

        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH));
        let handshake = serde_json::to_string(&Handshake {
            headers: identity.headers(),
        })?;
        framed.send(handshake).await?;

        debug!(addr = %self.addr, "tcp connection established");

        let connection = SinkExt::<String>::sink_map_err(framed, TransportError::from)
            .map(|frame| frame.map_err(TransportError::from));
        Ok(Box::pin(connection))
    }

    fn target(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

// ============================================================================
// In-process channels
// ============================================================================

/// Client half of an in-process connection
struct ChannelConnection {
    inbound: UnboundedReceiverStream<String>,
    outbound: mpsc::UnboundedSender<String>,
}

impl Stream for ChannelConnection {
    type Item = Result<String, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inbound)
            .poll_next(cx)
            .map(|frame| frame.map(Ok))
    }
}

impl Sink<String> for ChannelConnection {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.outbound.is_closed() {
            Poll::Ready(Err(TransportError::Closed))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn start_send(self: Pin<&mut Self>, item: String) -> Result<(), Self::Error> {
        self.outbound.send(item).map_err(|_| TransportError::Closed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Hub half of an in-process connection
#[derive(Debug)]
pub struct HubConnection {
    pub identity: ServiceIdentity,
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl HubConnection {
    /// Send an envelope to the client; false once the client is gone
    pub fn send(&self, message: &WsMessage) -> bool {
        match message.to_json() {
            Ok(frame) => self.send_raw(frame),
            Err(_) => false,
        }
    }

    /// Send a raw frame, valid JSON or not
    pub fn send_raw(&self, frame: impl Into<String>) -> bool {
        self.to_client.send(frame.into()).is_ok()
    }

    /// Next envelope from the client; `None` once the client hung up.
    /// Frames that fail to decode are skipped.
    pub async fn recv(&mut self) -> Option<WsMessage> {
        loop {
            let frame = self.from_client.recv().await?;
            if let Ok(message) = WsMessage::from_json(&frame) {
                return Some(message);
            }
        }
    }
}

/// Accepts in-process connections
#[derive(Debug)]
pub struct ChannelHub {
    accepted: mpsc::UnboundedReceiver<HubConnection>,
}

impl ChannelHub {
    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Option<HubConnection> {
        self.accepted.recv().await
    }
}

/// Connects to a [`ChannelHub`] in the same process
#[derive(Debug)]
pub struct ChannelConnector {
    hub: mpsc::UnboundedSender<HubConnection>,
    refusals: Mutex<u32>,
}

impl ChannelConnector {
    /// Connector and the hub it dials
    pub fn pair() -> (Self, ChannelHub) {
        let (hub, accepted) = mpsc::unbounded_channel();
        (
            Self {
                hub,
                refusals: Mutex::new(0),
            },
            ChannelHub { accepted },
        )
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_next(&self, count: u32) {
        *self.refusals.lock() = count;
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, identity: &ServiceIdentity) -> Result<BoxConnection, TransportError> {
        {
            let mut refusals = self.refusals.lock();
            if *refusals > 0 {
                *refusals -= 1;
                return Err(TransportError::Refused("scripted refusal".to_string()));
            }
        }

        let (to_client, client_inbound) = mpsc::unbounded_channel();
        let (client_outbound, from_client) = mpsc::unbounded_channel();

        self.hub
            .send(HubConnection {
                identity: identity.clone(),
                to_client,
                from_client,
            })
            .map_err(|_| TransportError::Refused("hub is gone".to_string()))?;

        Ok(Box::pin(ChannelConnection {
            inbound: UnboundedReceiverStream::new(client_inbound),
            outbound: client_outbound,
        }))
    }

    fn target(&self) -> String {
        "channel://in-process".to_string()
    }
}
