//! Shared vocabulary for the studymesh realtime layer.
//!
//! This crate defines the types that cross component boundaries (participant
//! identity, presence records, signaling envelopes, room configuration) and
//! the error taxonomy. It deliberately has no transport or WebRTC dependency:
//! SDP and ICE payloads travel as opaque JSON values so that the wire types
//! stay usable from any adapter.

pub mod config;
pub mod error;
pub mod identity;
pub mod presence;
pub mod signal;

pub use config::{RoomConfig, RtcConfig, DEFAULT_MAX_PEERS};
pub use error::{Error, Result};
pub use identity::{Identity, ParticipantId};
pub use presence::PresenceRecord;
pub use signal::{SignalKind, SignalingEnvelope};
