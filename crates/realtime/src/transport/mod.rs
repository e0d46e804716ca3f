//! Seam between the realtime layer and the hosted pub/sub service.
//!
//! Two channel flavors exist on the hosted side: a broadcast channel
//! (fire-and-forget fan-out, no state) and a presence channel (ephemeral
//! per-subscriber key/value state with aggregate change notifications).
//! Production deployments implement these traits against the hosted API;
//! [`MemoryHub`] implements them in-process for tests and demos.

pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use studymesh_core::{ParticipantId, PresenceRecord, Result, SignalingEnvelope};
use tokio::sync::mpsc;

pub use memory::MemoryHub;

/// Aggregate presence state: one record per key, last write wins.
pub type PresenceSnapshot = HashMap<ParticipantId, PresenceRecord>;

/// Notification delivered to presence subscribers.
///
/// `Sync` is the only event handlers may rebuild state from; `Joined` and
/// `Left` carry the key for logging but never for incremental bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Sync,
    Joined(ParticipantId),
    Left(ParticipantId),
}

/// A broadcast-only channel scoped to one room or voice channel.
///
/// Delivery is at-most-once and best-effort: no acknowledgment, no retry,
/// no cross-sender ordering. A single sender's messages arrive in send
/// order. Every subscriber, including the sender, receives every broadcast;
/// discarding self-originated messages is the consumer's job.
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    /// Join the channel. The receiver yields every inbound envelope in
    /// arrival order; dropping it ends the subscription.
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<SignalingEnvelope>>;

    /// Broadcast to all subscribers.
    async fn send(&self, envelope: &SignalingEnvelope) -> Result<()>;
}

/// A presence channel scoped to one room, bound to one participant key.
#[async_trait]
pub trait PresenceChannel: Send + Sync {
    /// Join the channel. Events arrive on the returned receiver.
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<PresenceEvent>>;

    /// Overwrite this participant's tracked record. Every subscriber's sync
    /// handler fires as a side effect.
    async fn track(&self, record: PresenceRecord) -> Result<()>;

    /// Remove this participant's record. Implicit on subscription end.
    async fn untrack(&self) -> Result<()>;

    /// Current aggregate snapshot. Consumers rebuild their peer map from
    /// this wholesale, never by diffing events.
    async fn presence_state(&self) -> PresenceSnapshot;
}

/// Factory handing out channels by name, the shape of the hosted client.
pub trait RealtimeTransport: Send + Sync {
    fn broadcast(&self, channel: &str) -> Arc<dyn BroadcastChannel>;
    fn presence(&self, channel: &str, key: &ParticipantId) -> Arc<dyn PresenceChannel>;
}
