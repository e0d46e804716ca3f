//! Error taxonomy for the realtime layer.
//!
//! Failures fall into two classes: fatal to a room-entry attempt (media
//! acquisition, signaling subscription) and isolated per-peer failures that
//! must never abort the room session.

use crate::identity::ParticipantId;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the studymesh realtime components.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The user declined capture access or no device was available.
    /// Fatal to the room-entry attempt; always surfaced to the caller.
    #[error("media access denied: {0}")]
    MediaAccessDenied(String),

    /// A hosted channel subscription did not reach subscribed status.
    /// Fatal for signaling (the mesh cannot form); presence degrades instead.
    #[error("channel subscription failed: {0}")]
    ChannelSubscriptionFailed(String),

    /// An `answer` or `candidate` referenced a peer with no connection entry.
    /// Logged and dropped by the dispatcher, never escalated.
    #[error("stale signaling message from {0}")]
    StaleSignalingMessage(ParticipantId),

    /// Session-description or ICE handling failed for one peer. The affected
    /// connection is left in a failed state; other peers are unaffected.
    #[error("negotiation failure: {0}")]
    NegotiationFailure(String),

    /// The mesh refused a connection past the configured peer bound.
    #[error("peer limit of {0} reached")]
    PeerLimitExceeded(usize),

    /// An operation was invoked in a room-session state that forbids it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Underlying WebRTC stack error.
    #[error("webrtc error: {0}")]
    WebRtc(String),

    /// Hosted transport error outside the subscription path.
    #[error("transport error: {0}")]
    Transport(String),

    /// Envelope (de)serialization error.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl Error {
    /// Whether this failure aborts a room-entry attempt.
    pub fn is_fatal_to_entry(&self) -> bool {
        matches!(
            self,
            Error::MediaAccessDenied(_) | Error::ChannelSubscriptionFailed(_)
        )
    }
}
