//! Callmesh error types.
//!
//! # Error Classification
//!
//! Errors are split by who can do something about them:
//!
//! - **Absorbed locally**: `Decode` and `ChannelClosed` come from the wire or the relay.
//!   The event loop logs them and keeps going.
//! - **Per session**: `Negotiation` and `UnknownSession` are tied to one remote participant.
//!   The session keeps its last valid state and the operation may be retried.
//! - **Fatal to an action**: `CapabilityUnavailable` stops joining, `Connection` and `Config`
//!   stop startup. None of them stop the signaling loop once it is running.

use thiserror::Error;

/// Callmesh errors.
#[derive(Error, Debug)]
pub enum SignalError {
    /// Malformed wire message.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Relay endpoint unreachable or handshake refused.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The relay channel was closed underneath us.
    #[error("Channel closed")]
    ChannelClosed,

    /// The peer-connection capability rejected an offer, answer or candidate.
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Local media or device access denied or unsupported.
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Operation names a remote participant we hold no session for.
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SignalError {
    /// Whether the signaling loop can carry on after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SignalError::Decode(_)
                | SignalError::Negotiation(_)
                | SignalError::UnknownSession(_)
                | SignalError::CapabilityUnavailable(_)
        )
    }
}

/// Result type alias for callmesh operations
pub type Result<T> = std::result::Result<T, SignalError>;

impl From<toml::de::Error> for SignalError {
    fn from(err: toml::de::Error) -> Self {
        SignalError::Config(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SignalError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SignalError::Connection(err.to_string())
    }
}
