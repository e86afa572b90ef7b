//! Per-remote negotiation state.
//!
//! A [`PeerSession`] records what has been agreed with one remote participant:
//! which side offered, which descriptions are in place on the connection, and
//! the candidates that arrived before they could be applied.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::message::{IceCandidate, SessionDescription};
use crate::error::SignalError;
use crate::identity::ParticipantId;
use crate::media::{ConnectionTag, MediaConnection, RemoteTrack};

/// Early candidates held per session; the oldest are dropped beyond this
pub const MAX_QUEUED_CANDIDATES: usize = 64;

/// Which side of the handshake we are on for a remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// No description exchanged yet
    Undetermined,
    /// We sent the offer
    Offerer,
    /// We answered their offer
    Answerer,
}

/// Description state, derived from the session's flags.
///
/// ```text
///   New ──create offer──> LocalOfferPending ──set local──> LocalDescriptionSet
///    │                                                          │
///    └──────────────── set remote ─────────> RemoteDescriptionSet <┘
/// ```
///
/// `RemoteDescriptionSet` is stable; a renegotiation re-enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    /// Nothing applied
    New,
    /// A local offer exists but is not applied yet
    LocalOfferPending,
    /// Our description is applied, theirs is not
    LocalDescriptionSet,
    /// Their description is applied
    RemoteDescriptionSet,
}

/// Live connection owned by a session
pub(crate) struct Attached {
    pub(crate) tag: ConnectionTag,
    pub(crate) connection: Box<dyn MediaConnection>,
    pub(crate) tracks_attached: bool,
}

/// Negotiation state for one remote participant
pub struct PeerSession {
    remote: ParticipantId,
    generation: u64,
    role: Role,
    local_description_set: bool,
    remote_description_set: bool,
    /// Local offer created but not applied yet
    pending_offer: Option<SessionDescription>,
    /// Our applied offer still waits for their answer
    awaiting_answer: bool,
    attached: Option<Attached>,
    /// ICE ufrag of the applied remote description
    remote_ufrag: Option<String>,
    queued_candidates: VecDeque<IceCandidate>,
    remote_tracks: Vec<RemoteTrack>,
    stats: SessionStats,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl PeerSession {
    /// Create an empty session for `remote`
    pub(crate) fn new(remote: ParticipantId, generation: u64) -> Self {
        Self {
            remote,
            generation,
            role: Role::Undetermined,
            local_description_set: false,
            remote_description_set: false,
            pending_offer: None,
            awaiting_answer: false,
            attached: None,
            remote_ufrag: None,
            queued_candidates: VecDeque::new(),
            remote_tracks: Vec::new(),
            stats: SessionStats::default(),
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// Remote participant
    pub fn remote(&self) -> &ParticipantId {
        &self.remote
    }

    /// Registry generation this session was created in
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Handshake role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current description state
    pub fn state(&self) -> NegotiationState {
        if self.remote_description_set {
            NegotiationState::RemoteDescriptionSet
        } else if self.local_description_set {
            NegotiationState::LocalDescriptionSet
        } else if self.pending_offer.is_some() {
            NegotiationState::LocalOfferPending
        } else {
            NegotiationState::New
        }
    }

    /// Our description is applied
    pub fn local_description_set(&self) -> bool {
        self.local_description_set
    }

    /// Their description is applied
    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    /// Both descriptions applied and no offer outstanding
    pub fn is_stable(&self) -> bool {
        self.local_description_set && self.remote_description_set && !self.awaiting_answer
    }

    /// Our offer is applied and unanswered
    pub fn awaiting_answer(&self) -> bool {
        self.awaiting_answer
    }

    /// A connection is attached
    pub fn has_connection(&self) -> bool {
        self.attached.is_some()
    }

    /// Tag of the attached connection
    pub fn connection_tag(&self) -> Option<ConnectionTag> {
        self.attached.as_ref().map(|a| a.tag)
    }

    /// Candidates waiting for the remote description
    pub fn queued_candidates(&self) -> usize {
        self.queued_candidates.len()
    }

    /// ICE username fragment of the applied remote description
    pub fn remote_ufrag(&self) -> Option<&str> {
        self.remote_ufrag.as_deref()
    }

    /// Whether `candidate` belongs to the remote description in place.
    ///
    /// Candidates without a ufrag, or sessions whose remote description
    /// declared none, cannot be told apart and are assumed to match.
    pub fn candidate_matches_remote(&self, candidate: &IceCandidate) -> bool {
        match (candidate.username_fragment.as_deref(), self.remote_ufrag.as_deref()) {
            (Some(theirs), Some(current)) => theirs == current,
            _ => true,
        }
    }

    /// Remote tracks surfaced so far
    pub fn remote_tracks(&self) -> &[RemoteTrack] {
        &self.remote_tracks
    }

    /// Last negotiation failure
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Counters
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Serializable view
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            remote: self.remote.to_string(),
            role: self.role,
            state: self.state(),
            local_description_set: self.local_description_set,
            remote_description_set: self.remote_description_set,
            awaiting_answer: self.awaiting_answer,
            connected: self.has_connection(),
            queued_candidates: self.queued_candidates.len(),
            remote_tracks: self.remote_tracks.len(),
            stats: self.stats.clone(),
            last_error: self.last_error.clone(),
            created_at: self.created_at,
        }
    }

    // --- transitions used by the negotiator -------------------------------

    pub(crate) fn attached(&self) -> Option<&Attached> {
        self.attached.as_ref()
    }

    pub(crate) fn attached_mut(&mut self) -> Option<&mut Attached> {
        self.attached.as_mut()
    }

    /// Swap in a new connection, resetting description state.
    ///
    /// Returns the replaced connection so the caller can close it.
    pub(crate) fn install(
        &mut self,
        tag: ConnectionTag,
        connection: Box<dyn MediaConnection>,
        role: Role,
        tracks_attached: bool,
    ) -> Option<Box<dyn MediaConnection>> {
        let previous = self.attached.replace(Attached {
            tag,
            connection,
            tracks_attached,
        });
        self.role = role;
        self.local_description_set = false;
        self.remote_description_set = false;
        self.remote_ufrag = None;
        self.pending_offer = None;
        self.awaiting_answer = false;
        self.remote_tracks.clear();
        previous.map(|a| a.connection)
    }

    /// Detach the connection, leaving the session empty
    pub(crate) fn detach(&mut self) -> Option<Box<dyn MediaConnection>> {
        self.local_description_set = false;
        self.remote_description_set = false;
        self.remote_ufrag = None;
        self.queued_candidates.clear();
        self.pending_offer = None;
        self.awaiting_answer = false;
        self.remote_tracks.clear();
        self.attached.take().map(|a| a.connection)
    }

    pub(crate) fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub(crate) fn offer_created(&mut self, offer: SessionDescription) {
        self.pending_offer = Some(offer);
    }

    pub(crate) fn take_pending_offer(&mut self) -> Option<SessionDescription> {
        self.pending_offer.take()
    }

    pub(crate) fn local_offer_applied(&mut self) {
        self.pending_offer = None;
        self.local_description_set = true;
        self.awaiting_answer = true;
        self.stats.descriptions_sent += 1;
    }

    pub(crate) fn local_answer_applied(&mut self) {
        self.local_description_set = true;
        self.stats.descriptions_sent += 1;
    }

    pub(crate) fn remote_offer_applied(&mut self, offer: &SessionDescription) {
        self.remote_description_set = true;
        self.remote_ufrag = offer.ice_ufrag().map(str::to_string);
        self.local_description_set = false;
        self.pending_offer = None;
        self.awaiting_answer = false;
        self.stats.descriptions_received += 1;
    }

    pub(crate) fn remote_answer_applied(&mut self, answer: &SessionDescription) {
        self.remote_description_set = true;
        self.remote_ufrag = answer.ice_ufrag().map(str::to_string);
        self.awaiting_answer = false;
        self.stats.descriptions_received += 1;
    }

    pub(crate) fn queue_candidate(&mut self, candidate: IceCandidate) {
        self.stats.candidates_received += 1;
        if self.queued_candidates.len() >= MAX_QUEUED_CANDIDATES {
            self.queued_candidates.pop_front();
            self.stats.candidates_dropped += 1;
        }
        self.queued_candidates.push_back(candidate);
    }

    pub(crate) fn take_queued_candidates(&mut self) -> VecDeque<IceCandidate> {
        std::mem::take(&mut self.queued_candidates)
    }

    pub(crate) fn candidate_received(&mut self) {
        self.stats.candidates_received += 1;
    }

    pub(crate) fn candidate_applied(&mut self) {
        self.stats.candidates_applied += 1;
    }

    pub(crate) fn candidate_dropped(&mut self) {
        self.stats.candidates_dropped += 1;
    }

    pub(crate) fn candidate_sent(&mut self) {
        self.stats.candidates_sent += 1;
    }

    pub(crate) fn remote_track_added(&mut self, track: RemoteTrack) {
        self.remote_tracks.push(track);
    }

    pub(crate) fn record_failure(&mut self, err: &SignalError) {
        self.stats.failures += 1;
        self.last_error = Some(err.to_string());
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("remote", &self.remote)
            .field("generation", &self.generation)
            .field("role", &self.role)
            .field("state", &self.state())
            .field("connection", &self.connection_tag())
            .field("queued_candidates", &self.queued_candidates.len())
            .finish_non_exhaustive()
    }
}

/// Session counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    /// Descriptions we applied locally and sent
    pub descriptions_sent: u64,
    /// Descriptions from the remote we applied
    pub descriptions_received: u64,
    /// Candidates received, counted on arrival whether or not they later
    /// apply; `received - applied - dropped` were queued or rejected
    pub candidates_received: u64,
    /// Candidates the connection accepted
    pub candidates_applied: u64,
    /// Queued candidates discarded: over the queue limit, or gathered for a
    /// remote connection that was since replaced
    pub candidates_dropped: u64,
    /// Local candidates sent to the remote
    pub candidates_sent: u64,
    /// Failed negotiation operations
    pub failures: u64,
}

/// Serializable view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Remote participant
    pub remote: String,
    /// Handshake role
    pub role: Role,
    /// Description state
    pub state: NegotiationState,
    /// Our description is applied
    pub local_description_set: bool,
    /// Their description is applied
    pub remote_description_set: bool,
    /// Our offer is unanswered
    pub awaiting_answer: bool,
    /// A connection is attached
    pub connected: bool,
    /// Candidates waiting for the remote description
    pub queued_candidates: usize,
    /// Remote tracks surfaced
    pub remote_tracks: usize,
    /// Counters
    pub stats: SessionStats,
    /// Last negotiation failure
    pub last_error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}
