//! Participant coordinator.
//!
//! A [`Peer`] runs the single event loop that serializes everything touching
//! negotiation state: frames from the relay, events from media connections
//! and commands from the application. The application talks to the loop
//! through a cloneable [`PeerHandle`] and observes it through a stream of
//! [`PeerEvent`]s.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use callmesh::{Config, Peer, SimulatedCapability, WsConnector};
//!
//! let config = Config::default();
//! let (peer, handle, mut events) =
//!     Peer::connect(&config, &WsConnector::new(), Arc::new(SimulatedCapability::new())).await?;
//! tokio::spawn(peer.run());
//!
//! handle.join().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

use std::ops::ControlFlow;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, SignalError};
use crate::identity::ParticipantId;
use crate::media::{MediaCapability, MediaConstraints, MediaEvent, RtcConfiguration};
use crate::protocol::{self, Negotiator, PeerEvent, SessionSnapshot};
use crate::transport::{Channel, ChannelReceiver, Connector, Outbox};

enum Command {
    Join(oneshot::Sender<Result<()>>),
    Renegotiate(ParticipantId, oneshot::Sender<Result<()>>),
    Sessions(oneshot::Sender<Vec<SessionSnapshot>>),
    Leave(oneshot::Sender<()>),
}

/// Frame counters for one loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Frames received from the relay
    pub frames: u64,
    /// Frames that failed to decode
    pub decode_errors: u64,
    /// Envelopes whose handling failed
    pub failures: u64,
}

/// One participant's event loop
pub struct Peer {
    negotiator: Negotiator,
    receiver: ChannelReceiver,
    media_events: mpsc::UnboundedReceiver<MediaEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    stats: LoopStats,
}

/// Cloneable control handle for a running [`Peer`]
#[derive(Debug, Clone)]
pub struct PeerHandle {
    identity: ParticipantId,
    commands: mpsc::UnboundedSender<Command>,
}

impl Peer {
    /// Wrap an open channel.
    ///
    /// Returns the loop, its handle and the application event stream.
    pub fn from_channel(
        identity: ParticipantId,
        channel: Channel,
        capability: Arc<dyn MediaCapability>,
        rtc: RtcConfiguration,
    ) -> (Self, PeerHandle, mpsc::UnboundedReceiver<PeerEvent>) {
        let (sender, receiver) = channel.split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let (negotiator, media_events) =
            Negotiator::new(Outbox::new(identity.clone(), sender), capability, rtc);

        let peer = Self {
            negotiator: negotiator.with_event_sink(events_tx),
            receiver,
            media_events,
            commands: commands_rx,
            stats: LoopStats::default(),
        };
        let handle = PeerHandle {
            identity,
            commands: commands_tx,
        };
        (peer, handle, events_rx)
    }

    /// Connect to the configured relay under a fresh identity.
    ///
    /// Local media is acquired right away; failing that the peer still answers
    /// offers, receive-only. With `signaling.auto_join` set the join offer goes
    /// out before this returns.
    pub async fn connect(
        config: &Config,
        connector: &dyn Connector,
        capability: Arc<dyn MediaCapability>,
    ) -> Result<(Self, PeerHandle, mpsc::UnboundedReceiver<PeerEvent>)> {
        let identity = ParticipantId::generate();
        let channel = connector.connect(&config.signaling.endpoint).await?;
        info!(
            %identity,
            endpoint = channel.endpoint(),
            connector = connector.name(),
            "connected"
        );

        let (mut peer, handle, events) =
            Self::from_channel(identity, channel, capability, config.rtc.clone());

        if peer.acquire_media(&config.media).await.is_ok() && config.signaling.auto_join {
            if let Err(err) = peer.negotiator.initiate_join().await {
                warn!(%err, "auto join failed");
            }
        }

        Ok((peer, handle, events))
    }

    /// Our identity
    pub fn identity(&self) -> &ParticipantId {
        self.negotiator.identity()
    }

    /// Capture local media before the loop starts
    pub async fn acquire_media(&mut self, constraints: &MediaConstraints) -> Result<()> {
        self.negotiator.acquire_media(constraints).await
    }

    /// Counters so far
    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Run the loop on a new task
    pub fn spawn(self) -> JoinHandle<LoopStats> {
        tokio::spawn(self.run())
    }

    /// Run until the relay channel closes or the peer leaves
    pub async fn run(mut self) -> LoopStats {
        info!(identity = %self.identity(), "signaling loop started");

        loop {
            tokio::select! {
                frame = self.receiver.recv() => match frame {
                    Some(frame) => self.handle_frame(frame).await,
                    None => {
                        info!("relay channel closed");
                        break;
                    },
                },
                Some(event) = self.media_events.recv() => {
                    self.negotiator.on_media_event(event).await;
                },
                Some(command) = self.commands.recv() => {
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                },
            }
        }

        info!(
            identity = %self.identity(),
            frames = self.stats.frames,
            decode_errors = self.stats.decode_errors,
            "signaling loop stopped"
        );
        self.stats
    }

    async fn handle_frame(&mut self, frame: Bytes) {
        self.stats.frames += 1;

        let envelope = match protocol::decode(&frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.stats.decode_errors += 1;
                warn!(%err, len = frame.len(), "dropping malformed signal");
                return;
            },
        };

        match self.negotiator.on_envelope(envelope).await {
            Ok(dispatch) => debug!(?dispatch, "signal handled"),
            Err(err) => {
                self.stats.failures += 1;
                debug!(%err, recoverable = err.is_recoverable(), "signal failed");
            },
        }
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Join(reply) => {
                let _ = reply.send(self.negotiator.initiate_join().await);
            },
            Command::Renegotiate(remote, reply) => {
                let _ = reply.send(self.negotiator.renegotiate(&remote).await);
            },
            Command::Sessions(reply) => {
                let _ = reply.send(self.negotiator.snapshots());
            },
            Command::Leave(reply) => {
                self.negotiator.leave().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            },
        }
        ControlFlow::Continue(())
    }
}

impl PeerHandle {
    /// Identity of the peer behind this handle
    pub fn identity(&self) -> &ParticipantId {
        &self.identity
    }

    /// Broadcast a join offer to the room
    pub async fn join(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Join(tx), rx).await?
    }

    /// Re-offer to `remote` on the existing connection
    pub async fn renegotiate(&self, remote: &ParticipantId) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Renegotiate(remote.clone(), tx), rx)
            .await?
    }

    /// Snapshot every session, ordered by remote
    pub async fn sessions(&self) -> Result<Vec<SessionSnapshot>> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Sessions(tx), rx).await
    }

    /// Say bye, close every connection and stop the loop
    pub async fn leave(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Leave(tx), rx).await
    }

    async fn request<T>(&self, command: Command, reply: oneshot::Receiver<T>) -> Result<T> {
        self.commands
            .send(command)
            .map_err(|_| SignalError::ChannelClosed)?;
        reply.await.map_err(|_| SignalError::ChannelClosed)
    }
}
