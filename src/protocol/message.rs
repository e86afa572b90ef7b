//! Signaling messages.
//!
//! Defines the envelope exchanged through the relay and the opaque
//! description and candidate blobs it carries. The JSON shape lives in
//! [`codec`](super::codec); these are the typed values the state machine sees.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::ParticipantId;

/// Description role in the offer/answer handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Proposal from the offering side
    Offer,
    /// Acceptance from the answering side
    Answer,
}

impl SdpKind {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        }
    }
}

impl std::fmt::Display for SdpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session description (SDP blob plus its role).
///
/// Fields other than `type` and `sdp` are kept verbatim in `extra` so they
/// survive a pass through this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Descriptor text
    pub sdp: String,
    /// Unrecognized descriptor fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionDescription {
    /// Create an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
            extra: Map::new(),
        }
    }

    /// Create an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
            extra: Map::new(),
        }
    }

    /// Check if this is an offer
    pub fn is_offer(&self) -> bool {
        self.kind == SdpKind::Offer
    }

    /// First `a=ice-ufrag:` value in the descriptor
    pub fn ice_ufrag(&self) -> Option<&str> {
        self.sdp
            .lines()
            .find_map(|line| line.trim_end().strip_prefix("a=ice-ufrag:"))
            .map(str::trim)
            .filter(|ufrag| !ufrag.is_empty())
    }
}

/// Trickle-ICE candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line (`candidate:...`); empty marks end-of-candidates
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
    /// Unrecognized candidate fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IceCandidate {
    /// Create a candidate from its line and media tags
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<&str>, sdp_m_line_index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: sdp_mid.map(str::to_string),
            sdp_m_line_index,
            username_fragment: None,
            extra: Map::new(),
        }
    }

    /// End-of-candidates marker
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.is_empty()
    }
}

/// Envelope payload variants
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Offer or answer
    Description {
        /// The descriptor
        description: SessionDescription,
        /// `true` when this starts a call on a new connection, `false` for an
        /// in-place renegotiation
        call: bool,
    },
    /// Trickle-ICE candidate
    Candidate(IceCandidate),
    /// Sender left the room
    Bye,
}

impl Payload {
    /// Short name for logs
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Description { description, .. } => description.kind.as_str(),
            Self::Candidate(_) => "ice",
            Self::Bye => "bye",
        }
    }
}

/// Wire unit exchanged through the relay
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Who sent it
    pub sender: ParticipantId,
    /// Intended recipient; `None` means everyone in the room
    pub recipient: Option<ParticipantId>,
    /// What it carries
    pub payload: Payload,
}

impl Envelope {
    /// Create a broadcast envelope
    pub fn new(sender: ParticipantId, payload: Payload) -> Self {
        Self {
            sender,
            recipient: None,
            payload,
        }
    }

    /// Create a description envelope
    pub fn description(sender: ParticipantId, description: SessionDescription, call: bool) -> Self {
        Self::new(sender, Payload::Description { description, call })
    }

    /// Create a candidate envelope
    pub fn candidate(sender: ParticipantId, candidate: IceCandidate) -> Self {
        Self::new(sender, Payload::Candidate(candidate))
    }

    /// Create a leave notice
    pub fn bye(sender: ParticipantId) -> Self {
        Self::new(sender, Payload::Bye)
    }

    /// Address the envelope to one participant
    pub fn to(mut self, recipient: ParticipantId) -> Self {
        self.recipient = Some(recipient);
        self
    }

    /// Whether `id` should act on this envelope
    pub fn is_for(&self, id: &ParticipantId) -> bool {
        self.recipient.as_ref().map_or(true, |r| r == id)
    }

    /// Get the description, if any
    pub fn get_description(&self) -> Option<&SessionDescription> {
        match &self.payload {
            Payload::Description { description, .. } => Some(description),
            _ => None,
        }
    }

    /// Get the candidate, if any
    pub fn get_candidate(&self) -> Option<&IceCandidate> {
        match &self.payload {
            Payload::Candidate(candidate) => Some(candidate),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_envelope() {
        let env = Envelope::description(
            ParticipantId::from("a"),
            SessionDescription::offer("v=0"),
            true,
        );
        assert_eq!(env.payload.kind_name(), "offer");
        assert!(env.get_description().unwrap().is_offer());
        assert!(env.get_candidate().is_none());
    }

    #[test]
    fn test_ice_ufrag() {
        let sdp = "v=0\r\ns=-\r\na=ice-ufrag:F7gI\r\na=ice-pwd:x\r\n";
        assert_eq!(SessionDescription::offer(sdp).ice_ufrag(), Some("F7gI"));
        assert_eq!(SessionDescription::answer("v=0\r\n").ice_ufrag(), None);
        assert_eq!(SessionDescription::answer("a=ice-ufrag:\r\n").ice_ufrag(), None);
    }

    #[test]
    fn test_addressing() {
        let a = ParticipantId::from("a");
        let b = ParticipantId::from("b");
        let c = ParticipantId::from("c");

        let broadcast = Envelope::bye(a.clone());
        assert!(broadcast.is_for(&b));
        assert!(broadcast.is_for(&c));

        let direct = Envelope::bye(a).to(b.clone());
        assert!(direct.is_for(&b));
        assert!(!direct.is_for(&c));
    }

    #[test]
    fn test_candidate_field_names() {
        let cand = IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host", Some("0"), Some(0));
        let json = serde_json::to_value(&cand).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
        assert!(json.get("usernameFragment").is_none());
        assert!(!cand.is_end_of_candidates());
    }
}
