//! # Callmesh - Mesh call signaling over a broadcast relay
//!
//! Signaling engine for peer-to-peer audio/video calls. Participants share a
//! room on a dumb relay that copies every message to everyone, themselves
//! included; each participant keeps one negotiation session per remote peer
//! and drives offer/answer and trickle-ICE exchange through a pluggable media
//! capability.
//!
//! ## Features
//!
//! - **Session per remote**: independent offer/answer state for every peer
//! - **Early candidates**: ICE candidates that beat their offer are queued, not lost
//! - **Glare handling**: simultaneous offers resolve by identity ordering
//! - **Directed messages**: optional `to` field on top of broadcast
//! - **Relay included**: axum WebSocket relay with rooms and departure notices
//!
//! ## Protocol Overview
//!
//! ### Architecture
//!
//! ```text
//!  Application                Peer (single loop)                  Relay
//!      |                            |                               |
//!      |-- PeerHandle::join ------->|-- {uuid, sdp, call} --------->|--> everyone
//!      |                            |<-- {uuid, sdp, call, to} -----|
//!      |<-- PeerEvent::Negotiated --|                               |
//!      |                            |<-> {uuid, ice} -------------->|
//!      |<-- PeerEvent::RemoteTrack -|                               |
//!      |-- PeerHandle::leave ------>|-- {uuid, bye} --------------->|
//! ```
//!
//! ### Wire Format
//!
//! One JSON object per text frame:
//!
//! | Field  | Type    | Meaning                                          |
//! |--------|---------|--------------------------------------------------|
//! | `uuid` | string  | Sender identity (required)                       |
//! | `to`   | string  | Recipient identity; absent means everyone        |
//! | `sdp`  | object  | `{type: "offer" \| "answer", sdp: "..."}`        |
//! | `call` | bool    | With `sdp`: new call (`true`) or renegotiation   |
//! | `ice`  | object  | `{candidate, sdpMid, sdpMLineIndex, ...}`        |
//! | `bye`  | bool    | Sender left the room                             |
//!
//! Exactly one of `sdp`, `ice` and `bye` is present.
//!
//! ## Quick Start
//!
//! ### Relay
//!
//! ```rust,ignore
//! use callmesh::{config::RelayConfig, relay::RelayServer};
//!
//! RelayServer::new(RelayConfig::default()).run().await?;
//! ```
//!
//! ### Participant
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use callmesh::{Config, Peer, SimulatedCapability, WsConnector};
//!
//! let config = Config::default();
//! let (peer, handle, mut events) =
//!     Peer::connect(&config, &WsConnector::new(), Arc::new(SimulatedCapability::new())).await?;
//! let task = peer.spawn();
//!
//! handle.join().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: envelopes, codec, sessions and the negotiation engine
//! - [`media`]: media capability traits and the simulated implementation
//! - [`transport`]: relay channels (WebSocket, in-process)
//! - [`relay`]: the broadcast relay server
//! - [`peer`]: the per-participant event loop
//! - [`config`]: TOML/environment configuration

pub mod config;
pub mod error;
pub mod identity;
pub mod media;
pub mod peer;
pub mod protocol;
pub mod relay;
pub mod transport;

pub use config::Config;
pub use error::{Result, SignalError};
pub use identity::ParticipantId;
pub use media::simulated::SimulatedCapability;
pub use media::{MediaCapability, MediaConnection};
pub use peer::{Peer, PeerHandle};
pub use protocol::{Envelope, Negotiator, Payload, PeerEvent};
pub use transport::{Connector, MemoryRelay, WsConnector};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
