//! Signaling protocol: wire messages, per-peer sessions and the negotiation
//! state machine.
//!
//! # Protocol Overview
//!
//! Participants share a room on a relay that broadcasts every message to every
//! member, the sender included. Each message is an [`Envelope`] stamped with
//! the sender's identity; receivers drop their own echoes and anything
//! addressed to somebody else.
//!
//! ## Message Flow
//!
//! ```text
//! A (joins)                         relay                          B
//!    |-- sdp offer, call ------------->|----------------------------->|
//!    |                                 |                              | set remote, attach
//!    |<--------------------------------|<-- sdp answer, call, to A ---| tracks, answer
//!    | set remote                      |                              |
//!    |-- ice (broadcast / to B) ------>|----------------------------->| add candidate
//!    |<--------------------------------|<-- ice (to A) ---------------| (queued until the
//!    |                                 |                              |  offer is applied)
//!    |-- bye ------------------------->|----------------------------->| tear down session
//! ```
//!
//! ## Session States
//!
//! | State                  | Meaning                              | Next                      |
//! |------------------------|--------------------------------------|---------------------------|
//! | `New`                  | Nothing applied                      | → LocalOfferPending, RemoteDescriptionSet |
//! | `LocalOfferPending`    | Offer created, not applied           | → LocalDescriptionSet     |
//! | `LocalDescriptionSet`  | Our offer applied, awaiting answer   | → RemoteDescriptionSet    |
//! | `RemoteDescriptionSet` | Their description applied (stable)   | re-entered on renegotiation |
//!
//! ## Policies
//!
//! | Situation                                   | Action                                  |
//! |---------------------------------------------|-----------------------------------------|
//! | Candidate before the remote description     | Queue in the session, flush after apply |
//! | Answer when our join offer is unclaimed     | Adopt the join connection (Offerer)     |
//! | Answer after our join offer was claimed     | Send that peer a directed fresh offer   |
//! | `call: true` offer on a negotiated session  | New call: answer on a fresh connection  |
//! | `call: false` offer                         | Renegotiate in place                    |
//! | Both sides offered (glare)                  | Greater identity's offer wins           |
//! | `bye`                                       | Close the connection, drop the session  |

mod codec;
mod message;
mod negotiator;
mod registry;
mod session;

pub use codec::{decode, encode, peek_sender};
pub use message::{Envelope, IceCandidate, Payload, SdpKind, SessionDescription};
pub use negotiator::{DiscardReason, Dispatch, Negotiator, PeerEvent};
pub use registry::PeerRegistry;
pub use session::{NegotiationState, PeerSession, Role, SessionSnapshot, SessionStats};

/// Room used when a relay path names none
pub const DEFAULT_ROOM: &str = "default";
