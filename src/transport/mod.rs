//! Signaling channel to the relay.
//!
//! A [`Channel`] is a bidirectional, ordered stream of opaque text frames
//! between one participant and the relay room it joined. The relay delivers
//! every frame to every member of the room, the sender included.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Peer (coordinator loop)          │
//! │   Outbox ──> ChannelSender              │
//! │   ChannelReceiver ──> decode ──> engine │
//! └──────────────────┬──────────────────────┘
//!                    │ Connector::connect
//!          ┌─────────┴─────────┐
//!          ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │   WsConnector   │ │   MemoryRelay   │
//! │  (WebSocket)    │ │  (in-process)   │
//! └─────────────────┘ └─────────────────┘
//! ```
//!
//! Connectors spawn pump tasks that own the underlying socket; the channel
//! halves are plain unbounded queues. Dropping every [`ChannelSender`] closes
//! the connection, which the relay reports to the room as a departure.

pub mod memory;
pub mod ws;

pub use memory::MemoryRelay;
pub use ws::WsConnector;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Result, SignalError};
use crate::identity::ParticipantId;
use crate::protocol::{self, Envelope, Payload};

/// Connector kind selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// WebSocket relay (default)
    #[default]
    WebSocket,
    /// In-process relay
    Memory,
}

impl TransportKind {
    /// Pick a kind from an endpoint URL scheme
    pub fn for_endpoint(endpoint: &str) -> Option<Self> {
        let scheme = endpoint.split_once("://")?.0;
        scheme.parse().ok()
    }

    /// Get descriptive name
    pub fn name(&self) -> &'static str {
        match self {
            Self::WebSocket => "WebSocket",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ws" | "wss" | "websocket" => Ok(Self::WebSocket),
            "memory" | "mem" => Ok(Self::Memory),
            _ => Err(format!("Unknown transport kind: {}", s)),
        }
    }
}

/// Sending half of a channel
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ChannelSender {
    /// Wrap the queue feeding a connector's writer task
    pub fn new(tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { tx }
    }

    /// Queue a frame for the relay
    pub fn send(&self, frame: Bytes) -> Result<()> {
        self.tx.send(frame).map_err(|_| SignalError::ChannelClosed)
    }

    /// The connection behind this sender is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a channel
#[derive(Debug)]
pub struct ChannelReceiver {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl ChannelReceiver {
    /// Wrap the queue filled by a connector's reader task
    pub fn new(rx: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self { rx }
    }

    /// Next frame from the relay; `None` once the connection is closed
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Next frame if one is already buffered
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

/// Open connection to a relay room
#[derive(Debug)]
pub struct Channel {
    endpoint: String,
    sender: ChannelSender,
    receiver: ChannelReceiver,
}

impl Channel {
    /// Assemble a channel from its halves
    pub fn new(endpoint: impl Into<String>, sender: ChannelSender, receiver: ChannelReceiver) -> Self {
        Self {
            endpoint: endpoint.into(),
            sender,
            receiver,
        }
    }

    /// Endpoint this channel is connected to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Split into sending and receiving halves
    pub fn split(self) -> (ChannelSender, ChannelReceiver) {
        (self.sender, self.receiver)
    }
}

/// Opens channels to a relay.
///
/// Same shape as the server-side transports: boxed futures keep the trait
/// object safe so a peer can be handed `&dyn Connector`.
pub trait Connector: Send + Sync {
    /// Connect to `endpoint`
    fn connect<'a>(
        &'a self,
        endpoint: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Channel>> + Send + 'a>>;

    /// Get the connector name for logging
    fn name(&self) -> &'static str;
}

/// Stamps, encodes and sends outbound signals
#[derive(Debug, Clone)]
pub struct Outbox {
    identity: ParticipantId,
    sender: ChannelSender,
}

impl Outbox {
    /// Create an outbox sending as `identity`
    pub fn new(identity: ParticipantId, sender: ChannelSender) -> Self {
        Self { identity, sender }
    }

    /// Identity stamped on every envelope
    pub fn identity(&self) -> &ParticipantId {
        &self.identity
    }

    /// Send `payload`, broadcast or addressed to `recipient`
    pub fn send(&self, recipient: Option<&ParticipantId>, payload: Payload) -> Result<Envelope> {
        let envelope = Envelope {
            sender: self.identity.clone(),
            recipient: recipient.cloned(),
            payload,
        };
        let frame = protocol::encode(&envelope)?;
        self.sender.send(frame)?;
        Ok(envelope)
    }
}
