//! Signaling envelopes.
//!
//! One envelope per message on a room's broadcast channel. `offer`, `answer`
//! and `candidate` are unicast-by-convention: every subscriber receives them,
//! but only the participant named in `target_id` acts. Payloads are carried as
//! opaque JSON so this crate stays independent of the WebRTC stack.

use crate::identity::ParticipantId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminant of a [`SignalingEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Join,
    Offer,
    Answer,
    Candidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transient message exchanged on the room's broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SignalingEnvelope {
    /// A participant announced itself; existing peers initiate toward it.
    Join { sender_id: ParticipantId },

    /// Session description offered by the initiator.
    Offer {
        sender_id: ParticipantId,
        target_id: ParticipantId,
        sdp: Value,
    },

    /// Session description answering an offer.
    Answer {
        sender_id: ParticipantId,
        target_id: ParticipantId,
        sdp: Value,
    },

    /// A discovered ICE candidate.
    Candidate {
        sender_id: ParticipantId,
        target_id: ParticipantId,
        candidate: Value,
    },
}

impl SignalingEnvelope {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Join { .. } => SignalKind::Join,
            Self::Offer { .. } => SignalKind::Offer,
            Self::Answer { .. } => SignalKind::Answer,
            Self::Candidate { .. } => SignalKind::Candidate,
        }
    }

    pub fn sender_id(&self) -> &ParticipantId {
        match self {
            Self::Join { sender_id }
            | Self::Offer { sender_id, .. }
            | Self::Answer { sender_id, .. }
            | Self::Candidate { sender_id, .. } => sender_id,
        }
    }

    /// Present for offer/answer/candidate; `join` is addressed to everyone.
    pub fn target_id(&self) -> Option<&ParticipantId> {
        match self {
            Self::Join { .. } => None,
            Self::Offer { target_id, .. }
            | Self::Answer { target_id, .. }
            | Self::Candidate { target_id, .. } => Some(target_id),
        }
    }

    /// Whether this envelope should be acted on by `local_id`.
    pub fn addressed_to(&self, local_id: &ParticipantId) -> bool {
        match self.target_id() {
            Some(target) => target == local_id,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_roundtrip() {
        let env = SignalingEnvelope::Join {
            sender_id: ParticipantId::authenticated("a"),
        };
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"kind\":\"join\""));
        let back: SignalingEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn offer_carries_target_and_payload() {
        let env = SignalingEnvelope::Offer {
            sender_id: ParticipantId::authenticated("a"),
            target_id: ParticipantId::authenticated("b"),
            sdp: json!({"type": "offer", "sdp": "v=0..."}),
        };
        assert_eq!(env.kind(), SignalKind::Offer);
        assert_eq!(env.target_id().unwrap().as_str(), "b");
        assert!(env.addressed_to(&ParticipantId::authenticated("b")));
        assert!(!env.addressed_to(&ParticipantId::authenticated("c")));
    }

    #[test]
    fn join_is_addressed_to_everyone() {
        let env = SignalingEnvelope::Join {
            sender_id: ParticipantId::authenticated("a"),
        };
        assert!(env.addressed_to(&ParticipantId::authenticated("anyone")));
    }
}
