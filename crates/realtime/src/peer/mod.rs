//! WebRTC peer mesh: per-peer links and the registry that owns them.

mod connection;
mod registry;

pub use connection::{LinkPhase, PeerLink};
pub use registry::{PeerRegistry, SignalingStats};
