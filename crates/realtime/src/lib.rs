//! Realtime layer for studymesh rooms.
//!
//! Two independent planes share a hosted pub/sub transport:
//!
//! - **Presence**: every participant tracks its own ephemeral record on the
//!   room's presence channel; the aggregate "who is here" view is rebuilt
//!   wholesale from the transport's snapshot on every sync.
//! - **Mesh signaling**: join/offer/answer/candidate envelopes on a broadcast
//!   channel drive a full mesh of WebRTC peer connections; no relay server,
//!   every participant connects directly to every other.
//!
//! [`session::RoomSession`] ties the planes together per room: it owns the
//! local media session, the peer registry and both channel subscriptions, and
//! tears all of them down on room exit.

pub mod media;
pub mod peer;
pub mod presence;
pub mod session;
pub mod signaling;
pub mod transport;

pub use media::{LocalMediaController, MediaSource, SilentMediaSource};
pub use peer::{LinkPhase, PeerLink, PeerRegistry, SignalingStats};
pub use presence::{ActivityPolicy, PresenceCoordinator, PresenceSnapshot};
pub use session::{RoomSession, RoomState};
pub use signaling::SignalingClient;
pub use transport::{
    BroadcastChannel, MemoryHub, PresenceChannel, PresenceEvent, RealtimeTransport,
};

pub use studymesh_core::{
    Error, Identity, ParticipantId, PresenceRecord, Result, RoomConfig, RtcConfig, SignalKind,
    SignalingEnvelope,
};
