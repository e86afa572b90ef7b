//! Broadcast relay.
//!
//! The relay knows nothing about negotiation. It accepts WebSocket
//! connections into rooms and copies every text frame to every member of the
//! room, the sender included:
//!
//! - `GET /ws` joins the `default` room
//! - `GET /ws/:room` joins a named room
//! - `GET /health` liveness check
//! - `GET /stats` room and member counts
//!
//! When a member that has sent at least one well-formed envelope disconnects,
//! the relay tells the rest of the room with `{"uuid": <id>, "bye": true}`.
//!
//! # Example
//!
//! ```rust,ignore
//! use callmesh::config::RelayConfig;
//! use callmesh::relay::RelayServer;
//!
//! let server = RelayServer::new(RelayConfig::default());
//! server.run().await?;
//! ```

mod handlers;
mod hub;
mod server;

pub use handlers::{create_router, health_check, RelayState};
pub use hub::{Hub, HubStats, MemberId};
pub use server::RelayServer;
