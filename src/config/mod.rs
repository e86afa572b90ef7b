//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (override the above in the binary)

use std::net::SocketAddr;
use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SignalError};
use crate::media::{IceServer, MediaConstraints, RtcConfiguration};

lazy_static! {
    static ref ENDPOINT_RE: Regex =
        Regex::new(r"^(wss?|memory)://[^\s/]+(/\S*)?$").expect("valid endpoint pattern");
    static ref ICE_URL_RE: Regex =
        Regex::new(r"^(stuns?|turns?):[^\s]+$").expect("valid ICE URL pattern");
}

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Relay connection settings
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Peer-connection settings
    #[serde(default)]
    pub rtc: RtcConfiguration,

    /// Local media to capture
    #[serde(default)]
    pub media: MediaConstraints,

    /// Relay server settings
    #[serde(default)]
    pub relay: RelayConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SignalError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| SignalError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location (`<config dir>/callmesh/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("callmesh").join("config.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(endpoint) = std::env::var("CALLMESH_ENDPOINT") {
            config.signaling.endpoint = endpoint;
        }
        if let Ok(flag) = std::env::var("CALLMESH_AUTO_JOIN") {
            config.signaling.auto_join = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Ok(servers) = std::env::var("CALLMESH_ICE_SERVERS") {
            let servers: Vec<_> = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(IceServer::url)
                .collect();
            if !servers.is_empty() {
                config.rtc.ice_servers = servers;
            }
        }

        // Relay settings
        if let Ok(host) = std::env::var("CALLMESH_RELAY_HOST") {
            config.relay.host = host;
        }
        if let Ok(port) = std::env::var("CALLMESH_RELAY_PORT") {
            if let Ok(port) = port.parse() {
                config.relay.port = port;
            }
        }

        config
    }

    /// Merge with another config (other takes precedence where it differs
    /// from the defaults)
    pub fn merge(self, other: Self) -> Self {
        let defaults = Self::default();
        Self {
            signaling: SignalingConfig {
                endpoint: if other.signaling.endpoint != defaults.signaling.endpoint {
                    other.signaling.endpoint
                } else {
                    self.signaling.endpoint
                },
                auto_join: other.signaling.auto_join || self.signaling.auto_join,
            },
            rtc: if other.rtc != defaults.rtc {
                other.rtc
            } else {
                self.rtc
            },
            media: if other.media != defaults.media {
                other.media
            } else {
                self.media
            },
            relay: RelayConfig {
                host: if other.relay.host != defaults.relay.host {
                    other.relay.host
                } else {
                    self.relay.host
                },
                port: if other.relay.port != defaults.relay.port {
                    other.relay.port
                } else {
                    self.relay.port
                },
                max_frame_bytes: if other.relay.max_frame_bytes != defaults.relay.max_frame_bytes {
                    other.relay.max_frame_bytes
                } else {
                    self.relay.max_frame_bytes
                },
            },
        }
    }

    /// Check endpoint and ICE server syntax
    pub fn validate(&self) -> Result<()> {
        if !ENDPOINT_RE.is_match(&self.signaling.endpoint) {
            return Err(SignalError::Config(format!(
                "Invalid signaling endpoint: {}",
                self.signaling.endpoint
            )));
        }

        for server in &self.rtc.ice_servers {
            if server.urls.is_empty() {
                return Err(SignalError::Config("ICE server without URLs".to_string()));
            }
            if let Some(url) = server.urls.iter().find(|u| !ICE_URL_RE.is_match(u)) {
                return Err(SignalError::Config(format!("Invalid ICE server URL: {url}")));
            }
            if server.is_turn() && (server.username.is_none() || server.credential.is_none()) {
                return Err(SignalError::Config(format!(
                    "TURN server {} needs username and credential",
                    server.urls[0]
                )));
            }
        }

        if self.relay.max_frame_bytes == 0 {
            return Err(SignalError::Config(
                "relay.max_frame_bytes must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Relay connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Relay endpoint (e.g., ws://127.0.0.1:8080/ws)
    pub endpoint: String,

    /// Broadcast a join offer as soon as connected
    pub auto_join: bool,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080/ws".to_string(),
            auto_join: false,
        }
    }
}

/// Relay server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Largest WebSocket message accepted from a member
    pub max_frame_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_frame_bytes: 64 * 1024,
        }
    }
}

impl RelayConfig {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse the listen address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr()
            .parse()
            .map_err(|e| SignalError::Config(format!("Invalid relay address: {e}")))
    }
}
