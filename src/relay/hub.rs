//! Room broadcast hub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::identity::ParticipantId;
use crate::protocol::{self, Envelope};

/// Handle for one connection in a room
pub type MemberId = u64;

struct Member {
    tx: mpsc::UnboundedSender<Bytes>,
    /// Learned from the first frame the member sends
    identity: Option<ParticipantId>,
}

#[derive(Default)]
struct Room {
    members: HashMap<MemberId, Member>,
}

impl Room {
    fn broadcast(&self, frame: &Bytes) -> usize {
        self.members
            .values()
            .filter(|m| m.tx.send(frame.clone()).is_ok())
            .count()
    }
}

/// Hub counters
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    /// Rooms with at least one member
    pub rooms: usize,
    /// Members across all rooms
    pub members: usize,
    /// Frames accepted for broadcast
    pub frames_relayed: u64,
}

/// Broadcasts every frame to every member of the sender's room, the sender
/// included.
///
/// Frames are forwarded untouched. The hub only peeks at the `uuid` of a
/// member's first frame so it can announce a `bye` on that member's behalf
/// when the connection drops.
#[derive(Default)]
pub struct Hub {
    rooms: Mutex<HashMap<String, Room>>,
    next_member: AtomicU64,
    frames_relayed: AtomicU64,
}

impl Hub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member to `room`, returning its id and its delivery queue
    pub fn join(&self, room: &str) -> (MemberId, mpsc::UnboundedReceiver<Bytes>) {
        let id = self.next_member.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut rooms = self.rooms.lock();
        rooms
            .entry(room.to_string())
            .or_default()
            .members
            .insert(id, Member { tx, identity: None });
        debug!(room, member = id, "member joined");

        (id, rx)
    }

    /// Broadcast `frame` from `from` to the whole room.
    ///
    /// Returns the number of members the frame was queued for.
    pub fn publish(&self, room: &str, from: MemberId, frame: Bytes) -> usize {
        let mut rooms = self.rooms.lock();
        let Some(entry) = rooms.get_mut(room) else {
            warn!(room, member = from, "publish to unknown room");
            return 0;
        };

        let Some(member) = entry.members.get_mut(&from) else {
            warn!(room, member = from, "publish from non-member");
            return 0;
        };
        if member.identity.is_none() {
            member.identity = protocol::peek_sender(&frame);
            if let Some(identity) = &member.identity {
                debug!(room, member = from, %identity, "member identified");
            }
        }

        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
        entry.broadcast(&frame)
    }

    /// Remove a member, announcing its departure to the rest of the room
    pub fn leave(&self, room: &str, member: MemberId) {
        let mut rooms = self.rooms.lock();
        let Some(entry) = rooms.get_mut(room) else {
            return;
        };
        let Some(departed) = entry.members.remove(&member) else {
            return;
        };
        debug!(room, member, "member left");

        if let Some(identity) = departed.identity {
            match protocol::encode(&Envelope::bye(identity)) {
                Ok(frame) => {
                    entry.broadcast(&frame);
                },
                Err(err) => warn!(%err, "failed to encode bye"),
            }
        }

        if entry.members.is_empty() {
            rooms.remove(room);
        }
    }

    /// Number of rooms with members
    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    /// Number of members in `room`
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms
            .lock()
            .get(room)
            .map_or(0, |r| r.members.len())
    }

    /// Snapshot counters
    pub fn stats(&self) -> HubStats {
        let rooms = self.rooms.lock();
        HubStats {
            rooms: rooms.len(),
            members: rooms.values().map(|r| r.members.len()).sum(),
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
        }
    }
}
