//! Participant identity.
//!
//! The identity provider is external; we only need an opaque, stable string
//! usable as a presence key. Unauthenticated participants get a session-scoped
//! guest id that is never persisted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable key identifying one participant within a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap an opaque id issued by the external identity provider.
    pub fn authenticated(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh guest id. Guest ids live for one session only.
    pub fn guest() -> Self {
        Self(format!("guest_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Whether this id was generated for an unauthenticated guest.
    pub fn is_guest(&self) -> bool {
        self.0.starts_with("guest_")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A participant as seen by the realtime layer: the presence key plus the
/// human-readable name published in presence records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: ParticipantId,
    pub display_name: String,
}

impl Identity {
    pub fn new(id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }

    /// Identity for a participant without an account.
    pub fn anonymous(display_name: impl Into<String>) -> Self {
        Self::new(ParticipantId::guest(), display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_ids_are_unique_and_marked() {
        let a = ParticipantId::guest();
        let b = ParticipantId::guest();
        assert_ne!(a, b);
        assert!(a.is_guest());
        assert!(!ParticipantId::authenticated("user-42").is_guest());
    }

    #[test]
    fn participant_id_serializes_transparently() {
        let id = ParticipantId::authenticated("user-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"user-42\"");
    }
}
