//! Presence records.
//!
//! One record per connected participant, keyed by [`ParticipantId`]. Records
//! are single-writer: only the owning participant publishes its own record,
//! and the aggregate view is always rebuilt from the transport's snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ephemeral per-participant state tracked on the room's presence channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    /// Human-readable identity.
    pub display_name: String,

    /// True only while the participant is studying AND the page is visible.
    pub is_active: bool,

    /// Free-text label, e.g. the subject being studied.
    pub activity_label: String,

    /// Refreshed on every mutation of this record.
    pub last_updated_at: DateTime<Utc>,
}

impl PresenceRecord {
    /// Initial record published right after subscribing: not yet studying.
    pub fn joining(display_name: impl Into<String>, activity_label: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            is_active: false,
            activity_label: activity_label.into(),
            last_updated_at: Utc::now(),
        }
    }

    /// Copy of this record with a new activity state and a fresh timestamp.
    pub fn with_active(&self, is_active: bool) -> Self {
        Self {
            is_active,
            last_updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Copy of this record with a new activity label and a fresh timestamp.
    pub fn with_label(&self, activity_label: impl Into<String>) -> Self {
        Self {
            activity_label: activity_label.into(),
            last_updated_at: Utc::now(),
            ..self.clone()
        }
    }
}
