//! Peer session registry.

use std::collections::HashMap;

use super::session::PeerSession;
use crate::identity::ParticipantId;
use crate::media::ConnectionTag;

/// Sessions keyed by remote participant.
///
/// Sessions are checked out while an operation runs on them and checked back
/// in afterwards, so the negotiator can hold a session and call into itself
/// without aliasing the map.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    sessions: HashMap<ParticipantId, PeerSession>,
    next_generation: u64,
}

impl PeerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the session for `remote`, creating it if unknown.
    ///
    /// The boolean is `true` when the session was just created.
    pub fn checkout(&mut self, remote: &ParticipantId) -> (PeerSession, bool) {
        match self.sessions.remove(remote) {
            Some(session) => (session, false),
            None => {
                self.next_generation += 1;
                (PeerSession::new(remote.clone(), self.next_generation), true)
            },
        }
    }

    /// Put a session back
    pub fn checkin(&mut self, session: PeerSession) {
        self.sessions.insert(session.remote().clone(), session);
    }

    /// Remove a session for good
    pub fn remove(&mut self, remote: &ParticipantId) -> Option<PeerSession> {
        self.sessions.remove(remote)
    }

    /// Look up a session
    pub fn get(&self, remote: &ParticipantId) -> Option<&PeerSession> {
        self.sessions.get(remote)
    }

    /// Look up a session mutably
    pub fn get_mut(&mut self, remote: &ParticipantId) -> Option<&mut PeerSession> {
        self.sessions.get_mut(remote)
    }

    /// Find the session owning the connection with `tag`
    pub fn find_by_tag_mut(&mut self, tag: ConnectionTag) -> Option<&mut PeerSession> {
        self.sessions
            .values_mut()
            .find(|s| s.connection_tag() == Some(tag))
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if there are no sessions
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterate over sessions
    pub fn iter(&self) -> impl Iterator<Item = &PeerSession> {
        self.sessions.values()
    }

    /// Remove and return every session
    pub fn drain(&mut self) -> Vec<PeerSession> {
        self.sessions.drain().map(|(_, s)| s).collect()
    }
}
