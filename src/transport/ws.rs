//! WebSocket connector.
//!
//! Text frames carry signaling messages. Binary frames from the relay are
//! passed through as-is and left for the decoder to reject.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::{Channel, ChannelReceiver, ChannelSender, Connector};
use crate::error::{Result, SignalError};

/// Connects to a relay over `ws://` or `wss://`
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }

    async fn open(endpoint: &str) -> Result<Channel> {
        let (stream, _response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| SignalError::Connection(format!("{endpoint}: {e}")))?;
        tracing::info!(endpoint, "connected to relay");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Bytes>();

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let message = match String::from_utf8(frame.to_vec()) {
                    Ok(text) => Message::Text(text),
                    Err(e) => Message::Binary(e.into_bytes()),
                };
                if let Err(err) = sink.send(message).await {
                    tracing::warn!(%err, "relay write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let peer = endpoint.to_string();
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let frame = match message {
                    Ok(Message::Text(text)) => Bytes::from(text),
                    Ok(Message::Binary(data)) => Bytes::from(data),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        tracing::warn!(%err, "relay read failed");
                        break;
                    },
                };
                if in_tx.send(frame).is_err() {
                    break;
                }
            }
            tracing::info!(endpoint = %peer, "relay connection closed");
        });

        Ok(Channel::new(
            endpoint,
            ChannelSender::new(out_tx),
            ChannelReceiver::new(in_rx),
        ))
    }
}

impl Connector for WsConnector {
    fn connect<'a>(
        &'a self,
        endpoint: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Channel>> + Send + 'a>> {
        Box::pin(Self::open(endpoint))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
