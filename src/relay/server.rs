//! Relay server over TCP.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use super::handlers::{create_router, RelayState};
use crate::config::RelayConfig;
use crate::error::{Result, SignalError};

/// WebSocket relay using Axum's built-in server
pub struct RelayServer {
    config: RelayConfig,
    state: Arc<RelayState>,
}

impl RelayServer {
    /// Create a relay
    pub fn new(config: RelayConfig) -> Self {
        let state = Arc::new(RelayState::new(config.max_frame_bytes));
        Self { config, state }
    }

    /// Shared state, for inspection
    pub fn state(&self) -> Arc<RelayState> {
        Arc::clone(&self.state)
    }

    /// Get the listen address as a URL
    pub fn listen_addr(&self) -> String {
        format!("http://{}", self.config.listen_addr())
    }

    /// Bind the configured address and serve until the task is cancelled
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SignalError::Connection(format!("Failed to bind relay to {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr: SocketAddr = listener.local_addr()?;
        tracing::info!("relay listening on ws://{}/ws", addr);

        axum::serve(listener, create_router(Arc::clone(&self.state)))
            .await
            .map_err(|e| SignalError::Connection(format!("Relay server error: {e}")))
    }
}
