//! Media capability boundary.
//!
//! The signaling engine never touches media. Capturing local tracks, running
//! ICE/DTLS/SRTP and producing descriptors all live behind two traits:
//!
//! - [`MediaCapability`]: acquires local media and creates connections
//! - [`MediaConnection`]: one peer connection (offer/answer, candidates)
//!
//! Connections report asynchronous happenings (a gathered local candidate, a
//! track from the remote side) through the [`ConnectionEvents`] handed to them
//! at creation. Every event carries the [`ConnectionTag`] of the connection
//! that produced it; the negotiator drops events whose tag no longer belongs
//! to a live connection.
//!
//! # Implementations
//!
//! - [`simulated::SimulatedCapability`]: fabricated descriptors and candidates,
//!   fault injection, per-connection records. Backs the tests and the CLI.

pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::{IceCandidate, SessionDescription};

/// Generation number identifying one created connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionTag(pub u64);

impl std::fmt::Display for ConnectionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Microphone or other audio
    Audio,
    /// Camera or other video
    Video,
}

impl TrackKind {
    /// SDP media name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// Which local media to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    /// Capture audio
    pub audio: bool,
    /// Capture video
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// One captured local track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    /// Track id
    pub id: String,
    /// Media kind
    pub kind: TrackKind,
}

/// Captured local stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMedia {
    /// Stream id
    pub stream_id: String,
    /// Tracks in the stream
    pub tracks: Vec<LocalTrack>,
}

/// Track surfaced by the remote side
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTrack {
    /// Track id
    pub id: String,
    /// Media kind
    pub kind: TrackKind,
    /// Remote stream id, when signaled
    pub stream_id: Option<String>,
}

/// STUN/TURN server entry.
///
/// Deserializes from a bare URL string or from a table with credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IceServerEntry")]
pub struct IceServer {
    /// Server URLs
    pub urls: Vec<String>,
    /// TURN username
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Credential-less server
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Any URL names a TURN relay
    pub fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IceServerEntry {
    Url(String),
    Full {
        #[serde(deserialize_with = "one_or_many")]
        urls: Vec<String>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        credential: Option<String>,
    },
}

impl From<IceServerEntry> for IceServer {
    fn from(entry: IceServerEntry) -> Self {
        match entry {
            IceServerEntry::Url(url) => IceServer::url(url),
            IceServerEntry::Full {
                urls,
                username,
                credential,
            } => IceServer {
                urls,
                username,
                credential,
            },
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// Peer-connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcConfiguration {
    /// STUN/TURN servers
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServer>,
}

impl Default for RtcConfiguration {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
        }
    }
}

fn default_ice_servers() -> Vec<IceServer> {
    vec![
        IceServer::url("stun:stun.stunprotocol.org:3478"),
        IceServer::url("stun:stun.l.google.com:19302"),
    ]
}

/// Something a connection reported asynchronously
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEventKind {
    /// A local candidate was gathered
    LocalCandidate(IceCandidate),
    /// The remote side added a track
    RemoteTrack(RemoteTrack),
}

/// Tagged connection event
#[derive(Debug, Clone, PartialEq)]
pub struct MediaEvent {
    /// Connection that produced the event
    pub tag: ConnectionTag,
    /// What happened
    pub kind: MediaEventKind,
}

/// Callback sink handed to a connection at creation
#[derive(Debug, Clone)]
pub struct ConnectionEvents {
    tag: ConnectionTag,
    tx: mpsc::UnboundedSender<MediaEvent>,
}

impl ConnectionEvents {
    /// Create a sink for the connection with `tag`
    pub fn new(tag: ConnectionTag, tx: mpsc::UnboundedSender<MediaEvent>) -> Self {
        Self { tag, tx }
    }

    /// Tag of the owning connection
    pub fn tag(&self) -> ConnectionTag {
        self.tag
    }

    /// Report a gathered local candidate; `false` once the engine is gone
    pub fn local_candidate(&self, candidate: IceCandidate) -> bool {
        self.emit(MediaEventKind::LocalCandidate(candidate))
    }

    /// Report a remote track; `false` once the engine is gone
    pub fn remote_track(&self, track: RemoteTrack) -> bool {
        self.emit(MediaEventKind::RemoteTrack(track))
    }

    fn emit(&self, kind: MediaEventKind) -> bool {
        self.tx
            .send(MediaEvent {
                tag: self.tag,
                kind,
            })
            .is_ok()
    }
}

/// Local media capture and connection factory
#[async_trait]
pub trait MediaCapability: Send + Sync {
    /// Capture local media; fails with `CapabilityUnavailable` when denied or unsupported
    async fn acquire_local_media(&self, constraints: &MediaConstraints) -> Result<LocalMedia>;

    /// Create a peer connection reporting through `events`
    async fn create_connection(
        &self,
        config: &RtcConfiguration,
        events: ConnectionEvents,
    ) -> Result<Box<dyn MediaConnection>>;

    /// Name for logging
    fn name(&self) -> &'static str;
}

/// One peer connection.
///
/// Negotiation calls fail with `Negotiation` errors; a failed call must leave
/// the connection as it was.
#[async_trait]
pub trait MediaConnection: Send + Sync {
    /// Add every track of `media` to the connection
    async fn attach_local_tracks(&self, media: &LocalMedia) -> Result<()>;

    /// Create an offer
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply our description
    async fn set_local_description(&self, description: &SessionDescription) -> Result<()>;

    /// Apply their description
    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()>;

    /// Apply a remote candidate
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Tear the connection down
    async fn close(&self);
}
