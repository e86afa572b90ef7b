//! Negotiation engine.
//!
//! The [`Negotiator`] owns every [`PeerSession`] and reacts to three kinds of
//! input, all delivered by a single coordinator task:
//!
//! - decoded [`Envelope`]s from the relay ([`Negotiator::on_envelope`])
//! - [`MediaEvent`]s reported by connections ([`Negotiator::on_media_event`])
//! - local requests: join, renegotiate, leave
//!
//! Capability calls are awaited inline, so one input is fully processed
//! before the next one is looked at and session state never interleaves.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::message::{Envelope, IceCandidate, Payload, SdpKind, SessionDescription};
use super::registry::PeerRegistry;
use super::session::{PeerSession, Role, SessionSnapshot};
use crate::error::{Result, SignalError};
use crate::identity::ParticipantId;
use crate::media::{
    ConnectionEvents, ConnectionTag, LocalMedia, MediaCapability, MediaConnection,
    MediaConstraints, MediaEvent, MediaEventKind, RemoteTrack, RtcConfiguration,
};
use crate::transport::Outbox;

/// Why an inbound message was dropped without effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Both sides offered and ours takes precedence
    Glare,
    /// An answer for an offer already answered
    Duplicate,
    /// An answer nobody asked for
    Unsolicited,
    /// A bye from a participant we hold no session for
    UnknownPeer,
}

/// Outcome of handling one inbound envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Our own message, echoed back by the relay
    SelfEcho,
    /// Addressed to another participant
    NotAddressed,
    /// Applied their offer and sent an answer
    Answered,
    /// Applied their answer; the session is stable
    Completed,
    /// Our join offer was already claimed; sent them a fresh offer
    Reoffered,
    /// Candidate handed to the connection
    CandidateApplied,
    /// Candidate held until the remote description is applied
    CandidateQueued,
    /// Dropped on purpose
    Discarded(DiscardReason),
    /// Session torn down after a bye
    SessionClosed,
}

/// Something the application may want to know about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PeerEvent {
    /// First message from a new remote participant
    SessionCreated {
        /// Remote participant
        remote: ParticipantId,
    },
    /// Offer and answer are both applied
    Negotiated {
        /// Remote participant
        remote: ParticipantId,
        /// Our side of the handshake
        role: Role,
    },
    /// The remote side surfaced a track
    RemoteTrack {
        /// Remote participant
        remote: ParticipantId,
        /// The track
        track: RemoteTrack,
    },
    /// A capability call failed; the session kept its previous state
    NegotiationFailed {
        /// Remote participant
        remote: ParticipantId,
        /// Error text
        reason: String,
    },
    /// Session torn down
    SessionClosed {
        /// Remote participant
        remote: ParticipantId,
    },
}

/// Join offer broadcast to the room and not yet claimed by an answer
struct PendingJoin {
    tag: ConnectionTag,
    connection: Box<dyn MediaConnection>,
    offer: SessionDescription,
}

/// Per-participant negotiation engine
pub struct Negotiator {
    outbox: Outbox,
    capability: Arc<dyn MediaCapability>,
    rtc: RtcConfiguration,
    registry: PeerRegistry,
    local_media: Option<LocalMedia>,
    pending_join: Option<PendingJoin>,
    joined: bool,
    next_tag: u64,
    media_tx: mpsc::UnboundedSender<MediaEvent>,
    events: Option<mpsc::UnboundedSender<PeerEvent>>,
}

impl Negotiator {
    /// Create an engine sending through `outbox`.
    ///
    /// The returned receiver yields the events of every connection the engine
    /// creates; feed them back through [`Negotiator::on_media_event`].
    pub fn new(
        outbox: Outbox,
        capability: Arc<dyn MediaCapability>,
        rtc: RtcConfiguration,
    ) -> (Self, mpsc::UnboundedReceiver<MediaEvent>) {
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let negotiator = Self {
            outbox,
            capability,
            rtc,
            registry: PeerRegistry::new(),
            local_media: None,
            pending_join: None,
            joined: false,
            next_tag: 0,
            media_tx,
            events: None,
        };
        (negotiator, media_rx)
    }

    /// Report [`PeerEvent`]s to `tx`
    pub fn with_event_sink(mut self, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Our identity
    pub fn identity(&self) -> &ParticipantId {
        self.outbox.identity()
    }

    /// Session for `remote`
    pub fn session(&self, remote: &ParticipantId) -> Option<&PeerSession> {
        self.registry.get(remote)
    }

    /// All sessions
    pub fn sessions(&self) -> impl Iterator<Item = &PeerSession> {
        self.registry.iter()
    }

    /// Serializable views of all sessions, ordered by remote
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<_> = self.registry.iter().map(PeerSession::snapshot).collect();
        snapshots.sort_by(|a, b| a.remote.cmp(&b.remote));
        snapshots
    }

    /// Captured local media, if any
    pub fn local_media(&self) -> Option<&LocalMedia> {
        self.local_media.as_ref()
    }

    /// Our join offer is out and unclaimed
    pub fn has_pending_join(&self) -> bool {
        self.pending_join.is_some()
    }

    /// Capture local media.
    ///
    /// Without media the engine still answers offers, receive-only.
    pub async fn acquire_media(&mut self, constraints: &MediaConstraints) -> Result<()> {
        match self.capability.acquire_local_media(constraints).await {
            Ok(media) => {
                info!(
                    capability = self.capability.name(),
                    tracks = media.tracks.len(),
                    "local media acquired"
                );
                self.local_media = Some(media);
                Ok(())
            },
            Err(err) => {
                warn!(%err, "local media unavailable");
                Err(err)
            },
        }
    }

    /// Broadcast a call offer to the room.
    ///
    /// The first answer claims the offer's connection; later answerers get a
    /// directed offer on a connection of their own. Calling this again while
    /// the offer is unclaimed re-broadcasts the same offer.
    pub async fn initiate_join(&mut self) -> Result<()> {
        let Some(media) = self.local_media.clone() else {
            return Err(SignalError::CapabilityUnavailable(
                "local media not acquired".to_string(),
            ));
        };

        if let Some(pending) = &self.pending_join {
            info!(tag = %pending.tag, "re-announcing join offer");
            self.send(
                None,
                Payload::Description {
                    description: pending.offer.clone(),
                    call: true,
                },
            );
            return Ok(());
        }

        let tag = self.allocate_tag();
        let connection = self
            .capability
            .create_connection(&self.rtc, self.connection_events(tag))
            .await?;

        let prepared = async {
            connection.attach_local_tracks(&media).await?;
            let offer = connection.create_offer().await?;
            connection.set_local_description(&offer).await?;
            Ok::<_, SignalError>(offer)
        }
        .await;
        let offer = match prepared {
            Ok(offer) => offer,
            Err(err) => {
                connection.close().await;
                return Err(err);
            },
        };

        self.pending_join = Some(PendingJoin {
            tag,
            connection,
            offer: offer.clone(),
        });
        self.joined = true;
        info!(%tag, identity = %self.identity(), "join offer broadcast");
        self.send(
            None,
            Payload::Description {
                description: offer,
                call: true,
            },
        );
        Ok(())
    }

    /// Send `remote` a new offer on the existing connection.
    ///
    /// Also retries an offer whose application failed earlier.
    pub async fn renegotiate(&mut self, remote: &ParticipantId) -> Result<()> {
        let Some(mut session) = self.registry.remove(remote) else {
            return Err(SignalError::UnknownSession(remote.to_string()));
        };

        let result = self.reoffer(&mut session).await;
        if let Err(err) = &result {
            self.fail(&mut session, err);
        }
        self.registry.checkin(session);
        result
    }

    /// Handle one decoded envelope from the relay.
    ///
    /// Errors are capability failures. The session is left as it was before
    /// the message, with the failure recorded on it.
    pub async fn on_envelope(&mut self, envelope: Envelope) -> Result<Dispatch> {
        let Envelope {
            sender,
            recipient,
            payload,
        } = envelope;

        if &sender == self.identity() {
            debug!(kind = payload.kind_name(), "dropping self echo");
            return Ok(Dispatch::SelfEcho);
        }
        if let Some(to) = &recipient {
            if to != self.identity() {
                debug!(from = %sender, %to, "not addressed to us");
                return Ok(Dispatch::NotAddressed);
            }
        }

        debug!(from = %sender, kind = payload.kind_name(), "signal received");
        if payload == Payload::Bye {
            return Ok(if self.close_session(&sender).await {
                Dispatch::SessionClosed
            } else {
                Dispatch::Discarded(DiscardReason::UnknownPeer)
            });
        }

        let (mut session, created) = self.registry.checkout(&sender);
        if created {
            info!(remote = %sender, generation = session.generation(), "peer session created");
            self.emit(PeerEvent::SessionCreated {
                remote: sender.clone(),
            });
        }

        let result = match payload {
            Payload::Description { description, call } => match description.kind {
                SdpKind::Offer => self.handle_offer(&mut session, description, call).await,
                SdpKind::Answer => self.handle_answer(&mut session, description).await,
            },
            Payload::Candidate(candidate) => self.handle_candidate(&mut session, candidate).await,
            Payload::Bye => Ok(Dispatch::Discarded(DiscardReason::UnknownPeer)),
        };

        if let Err(err) = &result {
            self.fail(&mut session, err);
        }
        self.registry.checkin(session);
        result
    }

    /// Route an event reported by a connection.
    ///
    /// Events from connections that were replaced or closed are dropped.
    pub async fn on_media_event(&mut self, event: MediaEvent) {
        let tag = event.tag;
        match event.kind {
            MediaEventKind::LocalCandidate(candidate) => {
                if self.pending_join.as_ref().is_some_and(|p| p.tag == tag) {
                    self.send(None, Payload::Candidate(candidate));
                    return;
                }
                let Some(session) = self.registry.find_by_tag_mut(tag) else {
                    debug!(%tag, "dropping candidate from retired connection");
                    return;
                };
                session.candidate_sent();
                let remote = session.remote().clone();
                self.send(Some(&remote), Payload::Candidate(candidate));
            },
            MediaEventKind::RemoteTrack(track) => {
                let Some(session) = self.registry.find_by_tag_mut(tag) else {
                    debug!(%tag, track = %track.id, "dropping track from retired connection");
                    return;
                };
                session.remote_track_added(track.clone());
                let remote = session.remote().clone();
                info!(%remote, track = %track.id, kind = track.kind.as_str(), "remote track");
                self.emit(PeerEvent::RemoteTrack { remote, track });
            },
        }
    }

    /// Tear down the session with `remote`; `false` if there was none
    pub async fn close_session(&mut self, remote: &ParticipantId) -> bool {
        let Some(mut session) = self.registry.remove(remote) else {
            return false;
        };
        if let Some(connection) = session.detach() {
            connection.close().await;
        }
        info!(%remote, "peer session closed");
        self.emit(PeerEvent::SessionClosed {
            remote: remote.clone(),
        });
        true
    }

    /// Announce departure and close every connection
    pub async fn leave(&mut self) {
        self.send(None, Payload::Bye);
        if let Some(pending) = self.pending_join.take() {
            pending.connection.close().await;
        }
        for mut session in self.registry.drain() {
            if let Some(connection) = session.detach() {
                connection.close().await;
            }
            self.emit(PeerEvent::SessionClosed {
                remote: session.remote().clone(),
            });
        }
        self.joined = false;
        info!(identity = %self.identity(), "left the room");
    }

    // --- handlers ---------------------------------------------------------

    async fn handle_offer(
        &mut self,
        session: &mut PeerSession,
        offer: SessionDescription,
        call: bool,
    ) -> Result<Dispatch> {
        let remote = session.remote().clone();

        let contested = session.awaiting_answer()
            || (call && session.role() == Role::Offerer && session.has_connection());
        if contested && self.identity() > &remote {
            debug!(%remote, "glare: keeping our offer");
            return Ok(Dispatch::Discarded(DiscardReason::Glare));
        }

        let fresh = !session.has_connection()
            || (call && (session.remote_description_set() || session.awaiting_answer()));
        let answer = if fresh {
            let tag = self.allocate_tag();
            let connection = self
                .capability
                .create_connection(&self.rtc, self.connection_events(tag))
                .await?;
            let mut tracks_attached = false;
            let answered = self
                .answer_on(connection.as_ref(), &offer, &mut tracks_attached)
                .await;
            let answer = match answered {
                Ok(answer) => answer,
                Err(err) => {
                    connection.close().await;
                    return Err(err);
                },
            };
            if let Some(previous) = session.install(tag, connection, Role::Answerer, tracks_attached) {
                previous.close().await;
            }
            debug!(%remote, %tag, "answered on a new connection");
            answer
        } else {
            let Some(attached) = session.attached_mut() else {
                return Err(SignalError::Negotiation("no connection".to_string()));
            };
            let answer = self
                .answer_on(attached.connection.as_ref(), &offer, &mut attached.tracks_attached)
                .await?;
            session.set_role(Role::Answerer);
            answer
        };

        session.remote_offer_applied(&offer);
        session.local_answer_applied();
        self.flush_candidates(session).await;

        self.send_description(&remote, answer, call);
        info!(%remote, "answered");
        self.emit(PeerEvent::Negotiated {
            remote,
            role: Role::Answerer,
        });
        Ok(Dispatch::Answered)
    }

    /// Apply `offer` and our answer to `connection`.
    ///
    /// Touches nothing but the connection, so a failure leaves the session
    /// as it was. Local tracks go on once; `tracks_attached` tracks that.
    async fn answer_on(
        &self,
        connection: &dyn MediaConnection,
        offer: &SessionDescription,
        tracks_attached: &mut bool,
    ) -> Result<SessionDescription> {
        connection.set_remote_description(offer).await?;

        if !*tracks_attached {
            match &self.local_media {
                Some(media) => {
                    connection.attach_local_tracks(media).await?;
                    *tracks_attached = true;
                },
                None => debug!("answering receive-only"),
            }
        }

        let answer = connection.create_answer().await?;
        connection.set_local_description(&answer).await?;
        Ok(answer)
    }

    async fn handle_answer(
        &mut self,
        session: &mut PeerSession,
        answer: SessionDescription,
    ) -> Result<Dispatch> {
        let remote = session.remote().clone();

        if session.awaiting_answer() {
            let Some(attached) = session.attached() else {
                return Err(SignalError::Negotiation("no connection".to_string()));
            };
            attached.connection.set_remote_description(&answer).await?;
            session.remote_answer_applied(&answer);
            self.flush_candidates(session).await;
            self.negotiated(session);
            return Ok(Dispatch::Completed);
        }

        // They answered our offer and then won glare with their own; the
        // connection they answered from is gone.
        let stale = session.has_connection()
            && session.role() == Role::Answerer
            && self.identity() < &remote;
        if stale {
            debug!(%remote, "glare: their offer won, ignoring answer to ours");
            return Ok(Dispatch::Discarded(DiscardReason::Glare));
        }

        if self.pending_join.is_some() {
            return self.adopt_join(session, answer).await;
        }

        // Our join offer went to someone else. Whatever this peer held before
        // was replaced when it answered, so give it a connection of its own.
        if self.joined {
            return self.fan_out(session).await;
        }

        let reason = if session.has_connection() {
            DiscardReason::Duplicate
        } else {
            DiscardReason::Unsolicited
        };
        debug!(%remote, ?reason, "ignoring answer");
        Ok(Dispatch::Discarded(reason))
    }

    /// Hand the broadcast join connection to the first answerer
    async fn adopt_join(
        &mut self,
        session: &mut PeerSession,
        answer: SessionDescription,
    ) -> Result<Dispatch> {
        let Some(pending) = self.pending_join.take() else {
            return Ok(Dispatch::Discarded(DiscardReason::Unsolicited));
        };
        if let Err(err) = pending.connection.set_remote_description(&answer).await {
            self.pending_join = Some(pending);
            return Err(err);
        }

        let tag = pending.tag;
        if let Some(previous) = session.install(tag, pending.connection, Role::Offerer, true) {
            previous.close().await;
        }
        session.local_offer_applied();
        session.remote_answer_applied(&answer);
        debug!(remote = %session.remote(), %tag, "join offer claimed");

        self.flush_candidates(session).await;
        self.negotiated(session);
        Ok(Dispatch::Completed)
    }

    /// Open a dedicated connection for a late answerer and offer on it
    async fn fan_out(&mut self, session: &mut PeerSession) -> Result<Dispatch> {
        let tag = self.allocate_tag();
        let connection = self
            .capability
            .create_connection(&self.rtc, self.connection_events(tag))
            .await?;

        let prepared = async {
            if let Some(media) = &self.local_media {
                connection.attach_local_tracks(media).await?;
            }
            let offer = connection.create_offer().await?;
            connection.set_local_description(&offer).await?;
            Ok::<_, SignalError>(offer)
        }
        .await;
        let offer = match prepared {
            Ok(offer) => offer,
            Err(err) => {
                connection.close().await;
                return Err(err);
            },
        };

        let tracks_attached = self.local_media.is_some();
        if let Some(previous) = session.install(tag, connection, Role::Offerer, tracks_attached) {
            previous.close().await;
        }
        session.local_offer_applied();
        debug!(remote = %session.remote(), %tag, "offering on a dedicated connection");

        let remote = session.remote().clone();
        self.send_description(&remote, offer, true);
        Ok(Dispatch::Reoffered)
    }

    async fn reoffer(&mut self, session: &mut PeerSession) -> Result<()> {
        if session.awaiting_answer() {
            return Err(SignalError::Negotiation(
                "an offer is already outstanding".to_string(),
            ));
        }
        // a connection the remote never described is new to them
        let call = !session.remote_description_set();

        let offer = match session.take_pending_offer() {
            Some(offer) => offer,
            None => {
                let Some(attached) = session.attached_mut() else {
                    return Err(SignalError::Negotiation("no connection".to_string()));
                };
                if !attached.tracks_attached {
                    if let Some(media) = &self.local_media {
                        attached.connection.attach_local_tracks(media).await?;
                        attached.tracks_attached = true;
                    }
                }
                attached.connection.create_offer().await?
            },
        };
        session.offer_created(offer.clone());
        self.apply_offer(session, offer, call).await?;
        session.set_role(Role::Offerer);
        Ok(())
    }

    async fn apply_offer(
        &mut self,
        session: &mut PeerSession,
        offer: SessionDescription,
        call: bool,
    ) -> Result<()> {
        let Some(attached) = session.attached() else {
            return Err(SignalError::Negotiation("no connection".to_string()));
        };
        attached.connection.set_local_description(&offer).await?;
        session.local_offer_applied();

        let remote = session.remote().clone();
        self.send_description(&remote, offer, call);
        Ok(())
    }

    async fn handle_candidate(
        &mut self,
        session: &mut PeerSession,
        candidate: IceCandidate,
    ) -> Result<Dispatch> {
        if !session.remote_description_set() || !session.has_connection() {
            debug!(remote = %session.remote(), "queueing early candidate");
            session.queue_candidate(candidate);
            return Ok(Dispatch::CandidateQueued);
        }
        // gathered by a remote connection whose offer has not reached us yet
        if !session.candidate_matches_remote(&candidate) {
            debug!(
                remote = %session.remote(),
                ufrag = ?candidate.username_fragment,
                "holding candidate for an undescribed connection"
            );
            session.queue_candidate(candidate);
            return Ok(Dispatch::CandidateQueued);
        }

        session.candidate_received();
        if let Some(attached) = session.attached() {
            attached.connection.add_ice_candidate(&candidate).await?;
        }
        session.candidate_applied();
        Ok(Dispatch::CandidateApplied)
    }

    /// Apply candidates held back until the remote description was in place.
    ///
    /// Candidates whose ufrag names another remote description belong to a
    /// connection that no longer exists and are dropped.
    async fn flush_candidates(&mut self, session: &mut PeerSession) {
        let queued = session.take_queued_candidates();
        if queued.is_empty() {
            return;
        }
        let Some(attached) = session.attached() else {
            return;
        };

        let total = queued.len();
        let mut applied = 0;
        let mut stale = 0;
        let mut failure = None;
        for candidate in queued {
            if !session.candidate_matches_remote(&candidate) {
                stale += 1;
                continue;
            }
            match attached.connection.add_ice_candidate(&candidate).await {
                Ok(()) => applied += 1,
                Err(err) => {
                    warn!(remote = %session.remote(), %err, "queued candidate rejected");
                    failure = Some(err);
                },
            }
        }

        for _ in 0..applied {
            session.candidate_applied();
        }
        for _ in 0..stale {
            session.candidate_dropped();
        }
        if let Some(err) = failure {
            session.record_failure(&err);
        }
        debug!(remote = %session.remote(), applied, stale, total, "flushed queued candidates");
    }

    // --- helpers ----------------------------------------------------------

    fn negotiated(&self, session: &PeerSession) {
        info!(remote = %session.remote(), role = ?session.role(), "negotiated");
        self.emit(PeerEvent::Negotiated {
            remote: session.remote().clone(),
            role: session.role(),
        });
    }

    fn fail(&self, session: &mut PeerSession, err: &SignalError) {
        warn!(remote = %session.remote(), %err, "negotiation step failed");
        session.record_failure(err);
        self.emit(PeerEvent::NegotiationFailed {
            remote: session.remote().clone(),
            reason: err.to_string(),
        });
    }

    fn allocate_tag(&mut self) -> ConnectionTag {
        self.next_tag += 1;
        ConnectionTag(self.next_tag)
    }

    fn connection_events(&self, tag: ConnectionTag) -> ConnectionEvents {
        ConnectionEvents::new(tag, self.media_tx.clone())
    }

    fn send_description(&self, remote: &ParticipantId, description: SessionDescription, call: bool) {
        self.send(Some(remote), Payload::Description { description, call });
    }

    fn send(&self, recipient: Option<&ParticipantId>, payload: Payload) {
        let kind = payload.kind_name();
        match self.outbox.send(recipient, payload) {
            Ok(_) => debug!(kind, to = ?recipient.map(ParticipantId::as_str), "signal sent"),
            Err(err) => warn!(kind, %err, "dropping outbound signal"),
        }
    }

    fn emit(&self, event: PeerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("identity", self.identity())
            .field("sessions", &self.registry.len())
            .field("pending_join", &self.pending_join.as_ref().map(|p| p.tag))
            .field("joined", &self.joined)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::simulated::{Operation, SimulatedCapability};
    use crate::protocol::codec;
    use crate::protocol::NegotiationState;
    use crate::transport::ChannelSender;

    struct Harness {
        negotiator: Negotiator,
        media_rx: mpsc::UnboundedReceiver<MediaEvent>,
        wire: mpsc::UnboundedReceiver<bytes::Bytes>,
        capability: SimulatedCapability,
    }

    impl Harness {
        async fn new(identity: &str) -> Self {
            let mut harness = Self::without_media(identity, SimulatedCapability::new());
            harness
                .negotiator
                .acquire_media(&MediaConstraints::default())
                .await
                .unwrap();
            harness
        }

        fn without_media(identity: &str, capability: SimulatedCapability) -> Self {
            let (tx, wire) = mpsc::unbounded_channel();
            let outbox = Outbox::new(ParticipantId::from(identity), ChannelSender::new(tx));
            let (negotiator, media_rx) = Negotiator::new(
                outbox,
                Arc::new(capability.clone()),
                RtcConfiguration::default(),
            );
            Self {
                negotiator,
                media_rx,
                wire,
                capability,
            }
        }

        /// Decoded envelopes sent since the last call
        fn sent(&mut self) -> Vec<Envelope> {
            let mut sent = Vec::new();
            while let Ok(frame) = self.wire.try_recv() {
                sent.push(codec::decode(&frame).unwrap());
            }
            sent
        }

        /// Route every pending media event
        async fn pump_media(&mut self) {
            while let Ok(event) = self.media_rx.try_recv() {
                self.negotiator.on_media_event(event).await;
            }
        }

        fn session(&self, remote: &str) -> &PeerSession {
            self.negotiator.session(&ParticipantId::from(remote)).unwrap()
        }
    }

    fn id(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    fn offer_from(sender: &str, call: bool) -> Envelope {
        Envelope::description(id(sender), SessionDescription::offer("v=0\r\n"), call)
    }

    fn answer_from(sender: &str) -> Envelope {
        Envelope::description(id(sender), SessionDescription::answer("v=0\r\n"), true)
    }

    fn candidate_from(sender: &str, n: u16) -> Envelope {
        Envelope::candidate(
            id(sender),
            IceCandidate::new(format!("candidate:{n} 1 udp 1 10.0.0.{n} 9 typ host"), Some("0"), Some(0)),
        )
    }

    fn offer_with_ufrag(sender: &str, ufrag: &str, call: bool) -> Envelope {
        let offer = SessionDescription::offer(format!("v=0\r\na=ice-ufrag:{ufrag}\r\n"));
        Envelope::description(id(sender), offer, call)
    }

    fn candidate_with_ufrag(sender: &str, n: u16, ufrag: &str) -> Envelope {
        let mut candidate =
            IceCandidate::new(format!("candidate:{n} 1 udp 1 10.0.1.{n} 9 typ host"), Some("0"), Some(0));
        candidate.username_fragment = Some(ufrag.to_string());
        Envelope::candidate(id(sender), candidate)
    }

    #[tokio::test]
    async fn test_self_echo_is_noop() {
        let mut h = Harness::new("me").await;
        for envelope in [offer_from("me", true), answer_from("me"), candidate_from("me", 1)] {
            assert_eq!(h.negotiator.on_envelope(envelope).await.unwrap(), Dispatch::SelfEcho);
        }
        assert_eq!(h.negotiator.sessions().count(), 0);
        assert!(h.sent().is_empty());
        assert!(h.capability.connections().is_empty());
    }

    #[tokio::test]
    async fn test_message_for_someone_else_is_ignored() {
        let mut h = Harness::new("me").await;
        let envelope = offer_from("r", true).to(id("other"));
        assert_eq!(
            h.negotiator.on_envelope(envelope).await.unwrap(),
            Dispatch::NotAddressed
        );
        assert_eq!(h.negotiator.sessions().count(), 0);
    }

    #[tokio::test]
    async fn test_offer_produces_exactly_one_answer() {
        let mut h = Harness::new("me").await;
        assert_eq!(
            h.negotiator.on_envelope(offer_from("r", true)).await.unwrap(),
            Dispatch::Answered
        );

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sender, id("me"));
        assert_eq!(sent[0].recipient, Some(id("r")));
        assert!(matches!(
            &sent[0].payload,
            Payload::Description { description, call: true } if description.kind == SdpKind::Answer
        ));

        let session = h.session("r");
        assert_eq!(session.role(), Role::Answerer);
        assert!(session.is_stable());
        assert_eq!(session.state(), NegotiationState::RemoteDescriptionSet);
    }

    #[tokio::test]
    async fn test_early_candidates_are_queued_then_applied() {
        let mut h = Harness::new("me").await;
        assert_eq!(
            h.negotiator.on_envelope(candidate_from("r", 1)).await.unwrap(),
            Dispatch::CandidateQueued
        );
        assert_eq!(
            h.negotiator.on_envelope(candidate_from("r", 2)).await.unwrap(),
            Dispatch::CandidateQueued
        );
        assert_eq!(h.session("r").queued_candidates(), 2);
        assert_eq!(h.session("r").state(), NegotiationState::New);

        h.negotiator.on_envelope(offer_from("r", true)).await.unwrap();
        let session = h.session("r");
        assert_eq!(session.queued_candidates(), 0);
        assert_eq!(session.stats().candidates_applied, 2);

        let record = h.capability.connection(session.connection_tag().unwrap()).unwrap();
        assert_eq!(record.candidates.len(), 2);
        assert!(record.candidates[0].candidate.starts_with("candidate:1"));

        assert_eq!(
            h.negotiator.on_envelope(candidate_from("r", 3)).await.unwrap(),
            Dispatch::CandidateApplied
        );
    }

    #[tokio::test]
    async fn test_repeated_call_offer_attaches_tracks_once_per_connection() {
        let mut h = Harness::new("me").await;
        h.negotiator.on_envelope(offer_from("r", true)).await.unwrap();
        h.negotiator.on_envelope(offer_from("r", true)).await.unwrap();
        assert_eq!(h.sent().len(), 2);

        let current = h.session("r").connection_tag().unwrap();
        let records = h.capability.connections();
        assert!(records.iter().all(|r| r.attached_track_sets <= 1));
        assert_eq!(h.capability.connection(current).unwrap().attached_track_sets, 1);
        assert_eq!(h.capability.open_connections(), 1);
    }

    #[tokio::test]
    async fn test_renegotiation_offer_reuses_connection() {
        let mut h = Harness::new("me").await;
        h.negotiator.on_envelope(offer_from("r", true)).await.unwrap();
        let tag = h.session("r").connection_tag();

        assert_eq!(
            h.negotiator.on_envelope(offer_from("r", false)).await.unwrap(),
            Dispatch::Answered
        );
        assert_eq!(h.session("r").connection_tag(), tag);
        assert_eq!(h.capability.connections().len(), 1);
        assert_eq!(h.capability.connections()[0].attached_track_sets, 1);

        let sent = h.sent();
        assert!(matches!(sent[1].payload, Payload::Description { call: false, .. }));
    }

    #[tokio::test]
    async fn test_failed_remote_description_leaves_state_unchanged() {
        let mut h = Harness::new("me").await;
        h.capability.fail_next(Operation::SetRemoteDescription);

        let err = h.negotiator.on_envelope(offer_from("r", true)).await.unwrap_err();
        assert!(matches!(err, SignalError::Negotiation(_)));

        let session = h.session("r");
        assert_eq!(session.state(), NegotiationState::New);
        assert_eq!(session.role(), Role::Undetermined);
        assert!(!session.has_connection());
        assert_eq!(session.stats().failures, 1);
        assert!(session.last_error().is_some());
        assert!(h.sent().is_empty());
        assert_eq!(h.capability.open_connections(), 0);

        // the same offer goes through once the capability recovers
        assert_eq!(
            h.negotiator.on_envelope(offer_from("r", true)).await.unwrap(),
            Dispatch::Answered
        );
    }

    #[tokio::test]
    async fn test_join_requires_media() {
        let mut h = Harness::without_media("me", SimulatedCapability::new().deny_media());
        assert!(h
            .negotiator
            .acquire_media(&MediaConstraints::default())
            .await
            .is_err());
        let err = h.negotiator.initiate_join().await.unwrap_err();
        assert!(matches!(err, SignalError::CapabilityUnavailable(_)));
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn test_answers_receive_only_without_media() {
        let mut h = Harness::without_media("me", SimulatedCapability::new());
        assert_eq!(
            h.negotiator.on_envelope(offer_from("r", true)).await.unwrap(),
            Dispatch::Answered
        );
        assert_eq!(h.capability.connections()[0].attached_track_sets, 0);
    }

    #[tokio::test]
    async fn test_join_broadcasts_offer_and_candidates() {
        let mut h = Harness::new("me").await;
        h.negotiator.initiate_join().await.unwrap();
        h.pump_media().await;

        let sent = h.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|e| e.recipient.is_none()));
        assert!(matches!(
            &sent[0].payload,
            Payload::Description { description, call: true } if description.is_offer()
        ));
        assert!(matches!(sent[1].payload, Payload::Candidate(_)));

        // a second join re-announces rather than opening another connection
        h.negotiator.initiate_join().await.unwrap();
        assert_eq!(h.sent().len(), 1);
        assert_eq!(h.capability.connections().len(), 1);
    }

    #[tokio::test]
    async fn test_first_answer_claims_join_and_later_answers_fan_out() {
        let mut h = Harness::new("me").await;
        h.negotiator.initiate_join().await.unwrap();
        h.pump_media().await;
        h.sent();

        assert_eq!(
            h.negotiator.on_envelope(answer_from("b")).await.unwrap(),
            Dispatch::Completed
        );
        assert!(!h.negotiator.has_pending_join());
        assert_eq!(h.session("b").role(), Role::Offerer);
        assert!(h.session("b").is_stable());

        assert_eq!(
            h.negotiator.on_envelope(answer_from("c")).await.unwrap(),
            Dispatch::Reoffered
        );
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, Some(id("c")));
        assert!(matches!(
            &sent[0].payload,
            Payload::Description { description, call: true } if description.is_offer()
        ));
        assert!(h.session("c").awaiting_answer());

        assert_eq!(
            h.negotiator.on_envelope(answer_from("c")).await.unwrap(),
            Dispatch::Completed
        );
        assert!(h.session("c").is_stable());
    }

    #[tokio::test]
    async fn test_answer_without_outstanding_offer() {
        let mut h = Harness::new("me").await;

        // "a" < "me": a repeated answer on our answering connection
        h.negotiator.on_envelope(offer_from("a", true)).await.unwrap();
        assert_eq!(
            h.negotiator.on_envelope(answer_from("a")).await.unwrap(),
            Dispatch::Discarded(DiscardReason::Duplicate)
        );

        // "z" > "me": an answer to an offer of ours that lost glare
        h.negotiator.on_envelope(offer_from("z", true)).await.unwrap();
        assert_eq!(
            h.negotiator.on_envelope(answer_from("z")).await.unwrap(),
            Dispatch::Discarded(DiscardReason::Glare)
        );
        assert!(h.session("z").is_stable());
    }

    #[tokio::test]
    async fn test_answer_from_replaced_peer_gets_fresh_offer() {
        let mut h = Harness::new("me").await;
        h.negotiator.initiate_join().await.unwrap();
        h.negotiator.on_envelope(answer_from("b")).await.unwrap();

        // "c" answered us earlier, then answered our join offer after "b"
        // claimed it
        h.negotiator.on_envelope(offer_from("c", true)).await.unwrap();
        let old = h.session("c").connection_tag();
        h.sent();

        assert_eq!(
            h.negotiator.on_envelope(answer_from("c")).await.unwrap(),
            Dispatch::Reoffered
        );
        assert_ne!(h.session("c").connection_tag(), old);
        assert_eq!(h.session("c").role(), Role::Offerer);
        assert_eq!(h.sent()[0].recipient, Some(id("c")));
    }

    #[tokio::test]
    async fn test_candidates_follow_their_connection() {
        let mut h = Harness::new("me").await;
        h.negotiator.initiate_join().await.unwrap();
        h.negotiator.on_envelope(answer_from("b")).await.unwrap();
        h.sent();

        // gathered while pending, routed after the claim
        h.pump_media().await;
        let sent = h.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|e| e.recipient == Some(id("b"))));
        assert_eq!(h.session("b").stats().candidates_sent, 2);
    }

    #[tokio::test]
    async fn test_out_of_order_candidate_matches_in_order_outcome() {
        async fn run(candidate_first: bool) -> (Vec<IceCandidate>, bool) {
            let mut h = Harness::new("me").await;
            h.negotiator.initiate_join().await.unwrap();
            let candidate = candidate_from("b", 7).to(id("me"));
            let answer = answer_from("b").to(id("me"));
            let order = if candidate_first {
                [candidate, answer]
            } else {
                [answer, candidate]
            };
            for envelope in order {
                h.negotiator.on_envelope(envelope).await.unwrap();
            }
            let session = h.session("b");
            let record = h.capability.connection(session.connection_tag().unwrap()).unwrap();
            (record.candidates, session.is_stable())
        }

        let (early, early_stable) = run(true).await;
        let (late, late_stable) = run(false).await;
        assert_eq!(early, late);
        assert_eq!(early.len(), 1);
        assert!(early_stable && late_stable);
    }

    #[tokio::test]
    async fn test_unsolicited_answer_is_discarded() {
        let mut h = Harness::new("me").await;
        assert_eq!(
            h.negotiator.on_envelope(answer_from("r")).await.unwrap(),
            Dispatch::Discarded(DiscardReason::Unsolicited)
        );
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn test_glare_prefers_greater_identity() {
        // "z" > "a": z keeps its offer, a yields
        let mut high = Harness::new("z").await;
        high.negotiator.on_envelope(offer_from("a", true)).await.unwrap();
        high.negotiator.renegotiate(&id("a")).await.unwrap();
        assert!(high.session("a").awaiting_answer());
        assert_eq!(
            high.negotiator.on_envelope(offer_from("a", false)).await.unwrap(),
            Dispatch::Discarded(DiscardReason::Glare)
        );
        assert!(high.session("a").awaiting_answer());

        let mut low = Harness::new("a").await;
        low.negotiator.on_envelope(offer_from("z", true)).await.unwrap();
        low.negotiator.renegotiate(&id("z")).await.unwrap();
        assert_eq!(
            low.negotiator.on_envelope(offer_from("z", false)).await.unwrap(),
            Dispatch::Answered
        );
        assert!(!low.session("z").awaiting_answer());
        assert_eq!(low.session("z").role(), Role::Answerer);
    }

    #[tokio::test]
    async fn test_renegotiate() {
        let mut h = Harness::new("me").await;
        let err = h.negotiator.renegotiate(&id("nobody")).await.unwrap_err();
        assert!(matches!(err, SignalError::UnknownSession(_)));

        h.negotiator.on_envelope(offer_from("r", true)).await.unwrap();
        h.sent();
        h.negotiator.renegotiate(&id("r")).await.unwrap();

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0].payload,
            Payload::Description { description, call: false } if description.is_offer()
        ));
        assert_eq!(h.session("r").role(), Role::Offerer);
        assert_eq!(h.capability.connections().len(), 1);

        assert!(h.negotiator.renegotiate(&id("r")).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_offer_is_retried() {
        let mut h = Harness::new("me").await;
        h.negotiator.on_envelope(offer_from("r", true)).await.unwrap();
        h.sent();

        h.capability.fail_next(Operation::SetLocalDescription);
        assert!(h.negotiator.renegotiate(&id("r")).await.is_err());
        assert_eq!(h.session("r").state(), NegotiationState::RemoteDescriptionSet);
        assert!(h.sent().is_empty());

        h.negotiator.renegotiate(&id("r")).await.unwrap();
        assert_eq!(h.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_bye_closes_session_and_retires_connection() {
        let mut h = Harness::new("me").await;
        h.negotiator.on_envelope(offer_from("r", true)).await.unwrap();
        h.sent();

        assert_eq!(
            h.negotiator.on_envelope(Envelope::bye(id("r"))).await.unwrap(),
            Dispatch::SessionClosed
        );
        assert!(h.negotiator.session(&id("r")).is_none());
        assert_eq!(h.capability.open_connections(), 0);

        // candidates gathered by the dead connection go nowhere
        h.pump_media().await;
        assert!(h.sent().is_empty());

        assert_eq!(
            h.negotiator.on_envelope(Envelope::bye(id("r"))).await.unwrap(),
            Dispatch::Discarded(DiscardReason::UnknownPeer)
        );
    }

    #[tokio::test]
    async fn test_remote_tracks_are_reported() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut h = Harness::new("me").await;
        h.negotiator = {
            let (negotiator, media_rx) = Negotiator::new(
                h.negotiator.outbox.clone(),
                Arc::new(h.capability.clone()),
                RtcConfiguration::default(),
            );
            h.media_rx = media_rx;
            negotiator.with_event_sink(tx)
        };

        let offer = SessionDescription::offer(
            "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 96\r\na=msid:s1 t1\r\n",
        );
        h.negotiator
            .on_envelope(Envelope::description(id("r"), offer, true))
            .await
            .unwrap();
        h.pump_media().await;

        assert_eq!(h.session("r").remote_tracks().len(), 1);
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen[0], PeerEvent::SessionCreated { .. }));
        assert!(seen
            .iter()
            .any(|e| matches!(e, PeerEvent::RemoteTrack { track, .. } if track.id == "t1")));
    }

    #[tokio::test]
    async fn test_leave_sends_bye_and_closes_everything() {
        let mut h = Harness::new("me").await;
        h.negotiator.initiate_join().await.unwrap();
        h.negotiator.on_envelope(offer_from("r", true)).await.unwrap();
        h.sent();

        h.negotiator.leave().await;
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload, Payload::Bye);
        assert_eq!(h.negotiator.sessions().count(), 0);
        assert!(!h.negotiator.has_pending_join());
        assert_eq!(h.capability.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_failed_first_answer_leaves_session_new() {
        for op in [
            Operation::AttachTracks,
            Operation::CreateAnswer,
            Operation::SetLocalDescription,
        ] {
            let mut h = Harness::new("me").await;
            h.capability.fail_next(op);

            assert!(h.negotiator.on_envelope(offer_from("r", true)).await.is_err(), "{op:?}");
            let session = h.session("r");
            assert_eq!(session.state(), NegotiationState::New, "{op:?}");
            assert_eq!(session.role(), Role::Undetermined, "{op:?}");
            assert!(!session.has_connection(), "{op:?}");
            assert_eq!(session.stats().descriptions_received, 0, "{op:?}");
            assert_eq!(session.stats().failures, 1, "{op:?}");
            assert_eq!(h.capability.open_connections(), 0, "{op:?}");
            assert!(h.sent().is_empty(), "{op:?}");

            assert_eq!(
                h.negotiator.on_envelope(offer_from("r", true)).await.unwrap(),
                Dispatch::Answered,
                "{op:?}"
            );
            assert!(h.session("r").is_stable(), "{op:?}");
        }
    }

    #[tokio::test]
    async fn test_failed_call_answer_keeps_established_connection() {
        let mut h = Harness::new("me").await;
        h.negotiator.on_envelope(offer_from("r", true)).await.unwrap();
        let established = h.session("r").connection_tag();
        h.sent();

        h.capability.fail_next(Operation::CreateAnswer);
        assert!(h.negotiator.on_envelope(offer_from("r", true)).await.is_err());

        let session = h.session("r");
        assert_eq!(session.connection_tag(), established);
        assert!(session.is_stable());
        assert_eq!(session.role(), Role::Answerer);
        assert_eq!(session.stats().descriptions_received, 1);
        assert_eq!(h.capability.open_connections(), 1);
        assert!(!h.capability.connection(established.unwrap()).unwrap().closed);
        assert!(h.sent().is_empty());

        assert_eq!(
            h.negotiator.on_envelope(offer_from("r", true)).await.unwrap(),
            Dispatch::Answered
        );
        assert_ne!(h.session("r").connection_tag(), established);
        assert_eq!(h.capability.open_connections(), 1);
    }

    #[tokio::test]
    async fn test_failed_renegotiation_answer_keeps_role() {
        let mut h = Harness::new("me").await;
        h.negotiator.on_envelope(offer_from("r", true)).await.unwrap();
        h.negotiator.renegotiate(&id("r")).await.unwrap();
        h.negotiator.on_envelope(answer_from("r")).await.unwrap();
        assert_eq!(h.session("r").role(), Role::Offerer);
        let tag = h.session("r").connection_tag();
        h.sent();

        h.capability.fail_next(Operation::SetLocalDescription);
        assert!(h.negotiator.on_envelope(offer_from("r", false)).await.is_err());

        let session = h.session("r");
        assert_eq!(session.role(), Role::Offerer);
        assert!(session.is_stable());
        assert_eq!(session.connection_tag(), tag);
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_fan_out_keeps_previous_connection() {
        for op in [
            Operation::AttachTracks,
            Operation::CreateOffer,
            Operation::SetLocalDescription,
        ] {
            let mut h = Harness::new("me").await;
            h.negotiator.initiate_join().await.unwrap();
            h.negotiator.on_envelope(answer_from("b")).await.unwrap();
            h.negotiator.on_envelope(offer_from("c", true)).await.unwrap();
            let previous = h.session("c").connection_tag();
            h.sent();

            h.capability.fail_next(op);
            assert!(h.negotiator.on_envelope(answer_from("c")).await.is_err(), "{op:?}");

            let session = h.session("c");
            assert_eq!(session.connection_tag(), previous, "{op:?}");
            assert_eq!(session.role(), Role::Answerer, "{op:?}");
            assert!(!session.awaiting_answer(), "{op:?}");
            assert!(session.is_stable(), "{op:?}");
            // b's claimed join connection and c's answering connection
            assert_eq!(h.capability.open_connections(), 2, "{op:?}");
            assert!(h.sent().is_empty(), "{op:?}");

            assert_eq!(
                h.negotiator.on_envelope(answer_from("c")).await.unwrap(),
                Dispatch::Reoffered,
                "{op:?}"
            );
            assert!(h.session("c").awaiting_answer(), "{op:?}");
        }
    }

    #[tokio::test]
    async fn test_rejected_candidate_counts_arrival_only() {
        let mut h = Harness::new("me").await;
        h.negotiator.on_envelope(offer_from("r", true)).await.unwrap();

        h.capability.fail_next(Operation::AddIceCandidate);
        assert!(h.negotiator.on_envelope(candidate_from("r", 1)).await.is_err());

        let session = h.session("r");
        assert_eq!(session.stats().candidates_received, 1);
        assert_eq!(session.stats().candidates_applied, 0);
        assert_eq!(session.stats().failures, 1);
        assert!(session.is_stable());
        let record = h.capability.connection(session.connection_tag().unwrap()).unwrap();
        assert!(record.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_recall_candidates_reach_new_connection_in_either_order() {
        async fn run(candidate_first: bool) -> (usize, Vec<IceCandidate>) {
            let mut h = Harness::new("me").await;
            h.negotiator.on_envelope(offer_with_ufrag("r", "one", true)).await.unwrap();
            let old = h.session("r").connection_tag().unwrap();

            let candidate = candidate_with_ufrag("r", 4, "two");
            let offer = offer_with_ufrag("r", "two", true);
            if candidate_first {
                assert_eq!(
                    h.negotiator.on_envelope(candidate).await.unwrap(),
                    Dispatch::CandidateQueued
                );
                h.negotiator.on_envelope(offer).await.unwrap();
            } else {
                h.negotiator.on_envelope(offer).await.unwrap();
                assert_eq!(
                    h.negotiator.on_envelope(candidate).await.unwrap(),
                    Dispatch::CandidateApplied
                );
            }

            let current = h.session("r").connection_tag().unwrap();
            assert_ne!(current, old);
            assert_eq!(h.session("r").remote_ufrag(), Some("two"));
            let old_record = h.capability.connection(old).unwrap();
            let new_record = h.capability.connection(current).unwrap();
            (old_record.candidates.len(), new_record.candidates)
        }

        let (early_old, early_new) = run(true).await;
        let (late_old, late_new) = run(false).await;
        assert_eq!(early_old, 0);
        assert_eq!(late_old, 0);
        assert_eq!(early_new, late_new);
        assert_eq!(early_new.len(), 1);
    }

    #[tokio::test]
    async fn test_candidate_for_replaced_connection_is_dropped() {
        let mut h = Harness::new("me").await;
        h.negotiator.on_envelope(offer_with_ufrag("r", "one", true)).await.unwrap();
        h.negotiator.on_envelope(offer_with_ufrag("r", "two", true)).await.unwrap();

        // late candidate from the connection "two" replaced
        assert_eq!(
            h.negotiator.on_envelope(candidate_with_ufrag("r", 1, "one")).await.unwrap(),
            Dispatch::CandidateQueued
        );
        assert_eq!(h.session("r").queued_candidates(), 1);

        h.negotiator.on_envelope(offer_with_ufrag("r", "two", false)).await.unwrap();
        let session = h.session("r");
        assert_eq!(session.queued_candidates(), 0);
        assert_eq!(session.stats().candidates_dropped, 1);
        assert_eq!(session.stats().candidates_applied, 0);
        assert_eq!(session.stats().failures, 0);
        assert!(session.last_error().is_none());
        let record = h.capability.connection(session.connection_tag().unwrap()).unwrap();
        assert!(record.candidates.is_empty());
    }
}
