//! In-process transport hub.
//!
//! Implements both channel flavors over local queues, mirroring the hosted
//! service's observable semantics: broadcasts fan out to every subscriber
//! including the sender, presence keeps the most-recently-tracked record per
//! key, and ending a presence subscription removes the key and notifies the
//! remaining subscribers. Used by the test suite and the demo binaries.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use studymesh_core::{Error, ParticipantId, PresenceRecord, Result, SignalingEnvelope};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{BroadcastChannel, PresenceChannel, PresenceEvent, PresenceSnapshot, RealtimeTransport};

#[derive(Default)]
struct PresenceRoom {
    records: HashMap<ParticipantId, PresenceRecord>,
    subscribers: Vec<mpsc::UnboundedSender<PresenceEvent>>,
}

impl PresenceRoom {
    fn notify(&mut self, event: PresenceEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[derive(Default)]
struct HubInner {
    // Envelopes cross the hub serialized, exercising the same framing the
    // hosted channel uses.
    broadcast: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>,
    presence: Mutex<HashMap<String, PresenceRoom>>,
    denied: Mutex<HashSet<String>>,
}

/// In-process stand-in for the hosted pub/sub service.
#[derive(Default, Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subscription attempt for `channel` fail, for exercising
    /// the degraded/aborted entry paths.
    pub fn deny_channel(&self, channel: &str) {
        self.inner.denied.lock().insert(channel.to_string());
    }

    /// Lift a prior [`deny_channel`](Self::deny_channel), letting retries
    /// succeed.
    pub fn allow_channel(&self, channel: &str) {
        self.inner.denied.lock().remove(channel);
    }

    /// Number of live broadcast subscriptions on `channel`.
    pub fn broadcast_subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .broadcast
            .lock()
            .get(channel)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn check_denied(&self, channel: &str) -> Result<()> {
        if self.inner.denied.lock().contains(channel) {
            return Err(Error::ChannelSubscriptionFailed(format!(
                "channel '{channel}' refused the subscription"
            )));
        }
        Ok(())
    }
}

impl RealtimeTransport for MemoryHub {
    fn broadcast(&self, channel: &str) -> Arc<dyn BroadcastChannel> {
        Arc::new(MemoryBroadcastChannel {
            hub: self.clone(),
            name: channel.to_string(),
        })
    }

    fn presence(&self, channel: &str, key: &ParticipantId) -> Arc<dyn PresenceChannel> {
        Arc::new(MemoryPresenceChannel {
            hub: self.clone(),
            name: channel.to_string(),
            key: key.clone(),
        })
    }
}

struct MemoryBroadcastChannel {
    hub: MemoryHub,
    name: String,
}

#[async_trait]
impl BroadcastChannel for MemoryBroadcastChannel {
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<SignalingEnvelope>> {
        self.hub.check_denied(&self.name)?;

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Value>();
        let (env_tx, env_rx) = mpsc::unbounded_channel::<SignalingEnvelope>();

        // Decode off the hub lock; malformed frames are dropped like the
        // hosted client drops them.
        tokio::spawn(async move {
            while let Some(frame) = raw_rx.recv().await {
                match serde_json::from_value::<SignalingEnvelope>(frame) {
                    Ok(envelope) => {
                        if env_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(err) => debug!("dropping malformed broadcast frame: {err}"),
                }
            }
        });

        self.hub
            .inner
            .broadcast
            .lock()
            .entry(self.name.clone())
            .or_default()
            .push(raw_tx);

        debug!(channel = %self.name, "broadcast subscription established");
        Ok(env_rx)
    }

    async fn send(&self, envelope: &SignalingEnvelope) -> Result<()> {
        let frame = serde_json::to_value(envelope)?;
        let mut rooms = self.hub.inner.broadcast.lock();
        if let Some(subs) = rooms.get_mut(&self.name) {
            subs.retain(|tx| tx.send(frame.clone()).is_ok());
            trace!(channel = %self.name, subscribers = subs.len(), "broadcast fan-out");
        }
        Ok(())
    }
}

struct MemoryPresenceChannel {
    hub: MemoryHub,
    name: String,
    key: ParticipantId,
}

impl MemoryPresenceChannel {
    fn remove_key(&self) {
        let mut rooms = self.hub.inner.presence.lock();
        if let Some(room) = rooms.get_mut(&self.name) {
            if room.records.remove(&self.key).is_some() {
                room.notify(PresenceEvent::Left(self.key.clone()));
                room.notify(PresenceEvent::Sync);
            }
        }
    }
}

#[async_trait]
impl PresenceChannel for MemoryPresenceChannel {
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<PresenceEvent>> {
        self.hub.check_denied(&self.name)?;

        let (tx, rx) = mpsc::unbounded_channel();
        // The hosted channel fires an initial sync right after subscribing.
        let _ = tx.send(PresenceEvent::Sync);

        let mut rooms = self.hub.inner.presence.lock();
        rooms.entry(self.name.clone()).or_default().subscribers.push(tx);

        debug!(channel = %self.name, key = %self.key, "presence subscription established");
        Ok(rx)
    }

    async fn track(&self, record: PresenceRecord) -> Result<()> {
        let mut rooms = self.hub.inner.presence.lock();
        let room = rooms.entry(self.name.clone()).or_default();
        let is_new = room.records.insert(self.key.clone(), record).is_none();
        if is_new {
            room.notify(PresenceEvent::Joined(self.key.clone()));
        }
        room.notify(PresenceEvent::Sync);
        Ok(())
    }

    async fn untrack(&self) -> Result<()> {
        self.remove_key();
        Ok(())
    }

    async fn presence_state(&self) -> PresenceSnapshot {
        self.hub
            .inner
            .presence
            .lock()
            .get(&self.name)
            .map(|room| room.records.clone())
            .unwrap_or_default()
    }
}

impl Drop for MemoryPresenceChannel {
    // The hosted transport derives "leave" from the subscription ending;
    // dropping the handle is that ending here.
    fn drop(&mut self) {
        self.remove_key();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn record(name: &str, active: bool) -> PresenceRecord {
        PresenceRecord::joining(name, "maths").with_active(active)
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber_including_sender() {
        let hub = MemoryHub::new();
        let a = hub.broadcast("room:general");
        let b = hub.broadcast("room:general");

        let mut rx_a = a.subscribe().await.unwrap();
        let mut rx_b = b.subscribe().await.unwrap();

        let env = SignalingEnvelope::Join {
            sender_id: ParticipantId::authenticated("alice"),
        };
        tokio_test::assert_ok!(a.send(&env).await);

        assert_eq!(rx_a.recv().await.unwrap(), env);
        assert_eq!(rx_b.recv().await.unwrap(), env);
    }

    #[tokio::test]
    async fn broadcast_preserves_single_sender_order() {
        let hub = MemoryHub::new();
        let a = hub.broadcast("room:r1");
        let mut rx = hub.broadcast("room:r1").subscribe().await.unwrap();

        for name in ["p1", "p2", "p3"] {
            a.send(&SignalingEnvelope::Join {
                sender_id: ParticipantId::authenticated(name),
            })
            .await
            .unwrap();
        }
        for name in ["p1", "p2", "p3"] {
            assert_eq!(
                rx.recv().await.unwrap().sender_id().as_str(),
                name,
                "messages must arrive in send order"
            );
        }
    }

    #[tokio::test]
    async fn presence_track_is_last_write_wins_per_key() {
        let hub = MemoryHub::new();
        let key = ParticipantId::authenticated("alice");
        let chan = hub.presence("room_r1", &key);
        let _rx = chan.subscribe().await.unwrap();

        tokio_test::assert_ok!(chan.track(record("Alice", false)).await);
        tokio_test::assert_ok!(chan.track(record("Alice", true)).await);

        let snapshot = chan.presence_state().await;
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[&key].is_active, "only the latest track survives");
    }

    #[tokio::test]
    async fn subscription_end_removes_key_and_notifies() {
        let hub = MemoryHub::new();
        let alice = ParticipantId::authenticated("alice");
        let bob = ParticipantId::authenticated("bob");

        let chan_a = hub.presence("room_r1", &alice);
        let chan_b = hub.presence("room_r1", &bob);
        let _rx_a = chan_a.subscribe().await.unwrap();
        let mut rx_b = chan_b.subscribe().await.unwrap();
        assert_eq!(rx_b.recv().await.unwrap(), PresenceEvent::Sync);

        chan_a.track(record("Alice", true)).await.unwrap();
        assert_eq!(rx_b.recv().await.unwrap(), PresenceEvent::Joined(alice.clone()));
        assert_eq!(rx_b.recv().await.unwrap(), PresenceEvent::Sync);

        drop(chan_a);
        assert_eq!(rx_b.recv().await.unwrap(), PresenceEvent::Left(alice.clone()));
        assert_eq!(rx_b.recv().await.unwrap(), PresenceEvent::Sync);
        assert!(chan_b.presence_state().await.is_empty());
    }

    #[tokio::test]
    async fn denied_channel_fails_subscription() {
        let hub = MemoryHub::new();
        hub.deny_channel("room:locked");
        let chan = hub.broadcast("room:locked");
        let err = chan.subscribe().await.unwrap_err();
        assert!(matches!(err, Error::ChannelSubscriptionFailed(_)));
    }
}
