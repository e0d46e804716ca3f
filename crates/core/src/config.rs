//! Room and NAT-traversal configuration.

use serde::{Deserialize, Serialize};

/// Upper bound on simultaneous peer connections. A full mesh sends every
/// stream N-1 times, so the bound is deliberately small.
pub const DEFAULT_MAX_PEERS: usize = 16;

/// NAT-traversal helper servers for peer connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcConfig {
    pub stun_servers: Vec<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
        }
    }
}

/// Per-room settings handed to a room session on entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Room identifier; channel names are derived from it.
    pub room_id: String,

    #[serde(default)]
    pub rtc: RtcConfig,

    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
}

fn default_max_peers() -> usize {
    DEFAULT_MAX_PEERS
}

impl RoomConfig {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            rtc: RtcConfig::default(),
            max_peers: DEFAULT_MAX_PEERS,
        }
    }

    /// Presence channel name, `room_{id}`.
    pub fn presence_channel(&self) -> String {
        format!("room_{}", self.room_id)
    }

    /// Broadcast signaling channel name, `room:{id}`.
    pub fn signaling_channel(&self) -> String {
        format!("room:{}", self.room_id)
    }
}
