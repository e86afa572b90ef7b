//! Simulated media capability.
//!
//! Behaves like a peer-connection stack from the signaling point of view
//! without capturing or sending media:
//!
//! - descriptors are fabricated SDP with one `m=` section per attached track
//! - applying a local description "gathers" a few host candidates
//! - applying a remote description surfaces one remote track per `a=msid` line
//! - candidates are refused until a remote description is applied
//!
//! State is shared between clones, so a test can keep one handle to inject
//! faults and inspect [`ConnectionRecord`]s while the engine owns another.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    ConnectionEvents, ConnectionTag, LocalMedia, LocalTrack, MediaCapability, MediaConnection,
    MediaConstraints, RemoteTrack, RtcConfiguration, TrackKind,
};
use crate::error::{Result, SignalError};
use crate::protocol::{IceCandidate, SdpKind, SessionDescription};

/// Capability operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `create_connection`
    CreateConnection,
    /// `attach_local_tracks`
    AttachTracks,
    /// `create_offer`
    CreateOffer,
    /// `create_answer`
    CreateAnswer,
    /// `set_local_description`
    SetLocalDescription,
    /// `set_remote_description`
    SetRemoteDescription,
    /// `add_ice_candidate`
    AddIceCandidate,
}

/// What happened to one simulated connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRecord {
    /// Connection tag
    pub tag: ConnectionTag,
    /// Number of `attach_local_tracks` calls
    pub attached_track_sets: usize,
    /// Tracks added, duplicates included
    pub tracks: Vec<LocalTrack>,
    /// Applied local description
    pub local: Option<SessionDescription>,
    /// Applied remote description
    pub remote: Option<SessionDescription>,
    /// Remote candidates applied
    pub candidates: Vec<IceCandidate>,
    /// Closed
    pub closed: bool,
}

impl ConnectionRecord {
    fn new(tag: ConnectionTag) -> Self {
        Self {
            tag,
            attached_track_sets: 0,
            tracks: Vec::new(),
            local: None,
            remote: None,
            candidates: Vec::new(),
            closed: false,
        }
    }
}

#[derive(Debug)]
struct Shared {
    faults: HashMap<Operation, u32>,
    media_denied: bool,
    candidates_per_description: u16,
    connections: BTreeMap<ConnectionTag, ConnectionRecord>,
    surfaced_tracks: HashMap<ConnectionTag, HashSet<String>>,
}

impl Shared {
    fn check(&mut self, op: Operation) -> Result<()> {
        match self.faults.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(SignalError::Negotiation(format!("injected {op:?} failure")))
            },
            _ => Ok(()),
        }
    }

    fn record(&mut self, tag: ConnectionTag) -> Result<&mut ConnectionRecord> {
        match self.connections.get_mut(&tag) {
            Some(record) if !record.closed => Ok(record),
            _ => Err(SignalError::Negotiation(format!("{tag} is closed"))),
        }
    }
}

/// Signaling-only media capability
#[derive(Debug, Clone)]
pub struct SimulatedCapability {
    shared: Arc<Mutex<Shared>>,
}

impl Default for SimulatedCapability {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCapability {
    /// Create a capability gathering two candidates per local description
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                faults: HashMap::new(),
                media_denied: false,
                candidates_per_description: 2,
                connections: BTreeMap::new(),
                surfaced_tracks: HashMap::new(),
            })),
        }
    }

    /// Set how many candidates each local description gathers
    pub fn with_candidates(self, count: u16) -> Self {
        self.shared.lock().candidates_per_description = count;
        self
    }

    /// Refuse local media access
    pub fn deny_media(self) -> Self {
        self.shared.lock().media_denied = true;
        self
    }

    /// Make the next call to `op` fail
    pub fn fail_next(&self, op: Operation) {
        *self.shared.lock().faults.entry(op).or_insert(0) += 1;
    }

    /// Records of every connection created so far, in creation order
    pub fn connections(&self) -> Vec<ConnectionRecord> {
        self.shared.lock().connections.values().cloned().collect()
    }

    /// Record of one connection
    pub fn connection(&self, tag: ConnectionTag) -> Option<ConnectionRecord> {
        self.shared.lock().connections.get(&tag).cloned()
    }

    /// Connections not closed yet
    pub fn open_connections(&self) -> usize {
        self.shared
            .lock()
            .connections
            .values()
            .filter(|r| !r.closed)
            .count()
    }
}

#[async_trait]
impl MediaCapability for SimulatedCapability {
    async fn acquire_local_media(&self, constraints: &MediaConstraints) -> Result<LocalMedia> {
        if self.shared.lock().media_denied {
            return Err(SignalError::CapabilityUnavailable(
                "media access denied".to_string(),
            ));
        }
        if !constraints.audio && !constraints.video {
            return Err(SignalError::CapabilityUnavailable(
                "no audio or video requested".to_string(),
            ));
        }

        let stream_id = uuid::Uuid::new_v4().simple().to_string();
        let mut tracks = Vec::new();
        for (wanted, kind) in [
            (constraints.audio, TrackKind::Audio),
            (constraints.video, TrackKind::Video),
        ] {
            if wanted {
                tracks.push(LocalTrack {
                    id: format!("{}-{}", &stream_id[..8], kind.as_str()),
                    kind,
                });
            }
        }

        Ok(LocalMedia { stream_id, tracks })
    }

    async fn create_connection(
        &self,
        config: &RtcConfiguration,
        events: ConnectionEvents,
    ) -> Result<Box<dyn MediaConnection>> {
        let mut shared = self.shared.lock();
        shared.check(Operation::CreateConnection)?;

        let tag = events.tag();
        shared.connections.insert(tag, ConnectionRecord::new(tag));
        tracing::debug!(%tag, ice_servers = config.ice_servers.len(), "simulated connection created");

        Ok(Box::new(SimulatedConnection {
            tag,
            events,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

struct SimulatedConnection {
    tag: ConnectionTag,
    events: ConnectionEvents,
    shared: Arc<Mutex<Shared>>,
}

impl SimulatedConnection {
    fn render(&self, kind: SdpKind, tracks: &[LocalTrack], stream_id: Option<&str>) -> SessionDescription {
        let mut sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=ice-ufrag:sim{}\r\n",
            self.tag.0, self.tag.0
        );
        for (mid, track) in tracks.iter().enumerate() {
            sdp.push_str(&format!(
                "m={} 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:{}\r\na=msid:{} {}\r\n",
                track.kind.as_str(),
                mid,
                stream_id.unwrap_or("-"),
                track.id
            ));
        }
        SessionDescription {
            kind,
            sdp,
            extra: serde_json::Map::new(),
        }
    }

    fn gathered_candidates(&self, count: u16) -> Vec<IceCandidate> {
        (1..=count)
            .map(|n| {
                let mut candidate = IceCandidate::new(
                    format!(
                        "candidate:{n} 1 udp 2122260223 10.{}.0.{n} {} typ host",
                        self.tag.0 % 256,
                        50000 + n
                    ),
                    Some("0"),
                    Some(0),
                );
                candidate.username_fragment = Some(format!("sim{}", self.tag.0));
                candidate
            })
            .collect()
    }
}

/// Parse `m=` / `a=msid:` pairs out of a fabricated description
fn remote_tracks(sdp: &str) -> Vec<RemoteTrack> {
    let mut kind = None;
    let mut tracks = Vec::new();
    for line in sdp.lines() {
        if let Some(media) = line.strip_prefix("m=") {
            kind = match media.split_whitespace().next() {
                Some("audio") => Some(TrackKind::Audio),
                Some("video") => Some(TrackKind::Video),
                _ => None,
            };
        } else if let Some(msid) = line.strip_prefix("a=msid:") {
            let mut parts = msid.split_whitespace();
            if let (Some(kind), Some(stream), Some(track)) = (kind, parts.next(), parts.next()) {
                tracks.push(RemoteTrack {
                    id: track.to_string(),
                    kind,
                    stream_id: (stream != "-").then(|| stream.to_string()),
                });
            }
        }
    }
    tracks
}

#[async_trait]
impl MediaConnection for SimulatedConnection {
    async fn attach_local_tracks(&self, media: &LocalMedia) -> Result<()> {
        let mut shared = self.shared.lock();
        shared.check(Operation::AttachTracks)?;
        let record = shared.record(self.tag)?;
        record.attached_track_sets += 1;
        record.tracks.extend(media.tracks.iter().cloned());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut shared = self.shared.lock();
        shared.check(Operation::CreateOffer)?;
        let record = shared.record(self.tag)?;
        let tracks = record.tracks.clone();
        let stream = stream_of(&tracks);
        Ok(self.render(SdpKind::Offer, &tracks, stream.as_deref()))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut shared = self.shared.lock();
        shared.check(Operation::CreateAnswer)?;
        let record = shared.record(self.tag)?;
        if !record.remote.as_ref().is_some_and(SessionDescription::is_offer) {
            return Err(SignalError::Negotiation(
                "cannot answer without a remote offer".to_string(),
            ));
        }
        let tracks = record.tracks.clone();
        let stream = stream_of(&tracks);
        Ok(self.render(SdpKind::Answer, &tracks, stream.as_deref()))
    }

    async fn set_local_description(&self, description: &SessionDescription) -> Result<()> {
        let candidates = {
            let mut shared = self.shared.lock();
            shared.check(Operation::SetLocalDescription)?;
            let count = shared.candidates_per_description;
            let record = shared.record(self.tag)?;
            if description.kind == SdpKind::Answer
                && !record.remote.as_ref().is_some_and(SessionDescription::is_offer)
            {
                return Err(SignalError::Negotiation(
                    "local answer without a remote offer".to_string(),
                ));
            }
            record.local = Some(description.clone());
            self.gathered_candidates(count)
        };

        for candidate in candidates {
            self.events.local_candidate(candidate);
        }
        Ok(())
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        let fresh_tracks = {
            let mut shared = self.shared.lock();
            shared.check(Operation::SetRemoteDescription)?;
            let record = shared.record(self.tag)?;
            if description.kind == SdpKind::Answer
                && !record.local.as_ref().is_some_and(SessionDescription::is_offer)
            {
                return Err(SignalError::Negotiation(
                    "remote answer without a local offer".to_string(),
                ));
            }
            record.remote = Some(description.clone());

            let seen = shared.surfaced_tracks.entry(self.tag).or_default();
            remote_tracks(&description.sdp)
                .into_iter()
                .filter(|t| seen.insert(t.id.clone()))
                .collect::<Vec<_>>()
        };

        for track in fresh_tracks {
            self.events.remote_track(track);
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let mut shared = self.shared.lock();
        shared.check(Operation::AddIceCandidate)?;
        let record = shared.record(self.tag)?;
        if record.remote.is_none() {
            return Err(SignalError::Negotiation(
                "remote description not set".to_string(),
            ));
        }
        record.candidates.push(candidate.clone());
        Ok(())
    }

    async fn close(&self) {
        if let Some(record) = self.shared.lock().connections.get_mut(&self.tag) {
            record.closed = true;
        }
    }
}

fn stream_of(tracks: &[LocalTrack]) -> Option<String> {
    tracks
        .first()
        .and_then(|t| t.id.split('-').next())
        .map(str::to_string)
}
