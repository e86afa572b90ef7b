//! In-process relay.
//!
//! Runs the same room [`Hub`] the WebSocket relay uses, minus the sockets.
//! Handy for tests and for wiring several peers together inside one process.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{Channel, ChannelReceiver, ChannelSender, Connector};
use crate::error::Result;
use crate::relay::Hub;

const SCHEME: &str = "memory://";

/// Relay living in the current process
#[derive(Clone, Default)]
pub struct MemoryRelay {
    hub: Arc<Hub>,
}

impl MemoryRelay {
    /// Create an empty relay
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared hub, for inspection
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Join `room`.
    ///
    /// Must be called inside a Tokio runtime: a pump task forwards outbound
    /// frames to the hub and removes the member once every sender is dropped.
    pub fn join(&self, room: &str) -> Channel {
        let (member, inbound) = self.hub.join(room);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();

        let hub = Arc::clone(&self.hub);
        let room = room.to_string();
        let endpoint = format!("{SCHEME}{room}");
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                hub.publish(&room, member, frame);
            }
            hub.leave(&room, member);
        });

        Channel::new(
            endpoint,
            ChannelSender::new(out_tx),
            ChannelReceiver::new(inbound),
        )
    }
}

impl Connector for MemoryRelay {
    fn connect<'a>(
        &'a self,
        endpoint: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Channel>> + Send + 'a>> {
        Box::pin(async move {
            let room = endpoint.strip_prefix(SCHEME).unwrap_or(endpoint);
            Ok(self.join(room))
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
