//! Room signaling over a shared broadcast channel.
//!
//! Every envelope reaches every subscriber, the sender included. The client
//! therefore filters on receive: its own envelopes are discarded before
//! dispatch (processing a self-offer would corrupt negotiation state), and
//! targeted envelopes addressed to someone else are ignored.

use crate::transport::{BroadcastChannel, RealtimeTransport};
use std::sync::Arc;
use studymesh_core::{ParticipantId, Result, SignalingEnvelope};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// One participant's handle on a room's signaling channel.
pub struct SignalingClient {
    channel: Arc<dyn BroadcastChannel>,
    local_id: ParticipantId,
    inbound: mpsc::UnboundedReceiver<SignalingEnvelope>,
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("local_id", &self.local_id)
            .finish_non_exhaustive()
    }
}

impl SignalingClient {
    /// Subscribe to the room's broadcast channel. A failure here aborts room
    /// entry: without signaling no connection can ever be negotiated.
    pub async fn subscribe(
        transport: &dyn RealtimeTransport,
        channel_name: &str,
        local_id: ParticipantId,
    ) -> Result<Self> {
        let channel = transport.broadcast(channel_name);
        let inbound = channel.subscribe().await?;
        info!(channel = %channel_name, %local_id, "signaling channel subscribed");
        Ok(Self {
            channel,
            local_id,
            inbound,
        })
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Next envelope relevant to this participant.
    ///
    /// Self-originated envelopes and envelopes targeted at another peer are
    /// filtered out here, never reaching the caller. `None` means the channel
    /// closed.
    pub async fn recv(&mut self) -> Option<SignalingEnvelope> {
        while let Some(envelope) = self.inbound.recv().await {
            if *envelope.sender_id() == self.local_id {
                trace!(kind = %envelope.kind(), "discarding own broadcast");
                continue;
            }
            if !envelope.addressed_to(&self.local_id) {
                trace!(
                    kind = %envelope.kind(),
                    sender = %envelope.sender_id(),
                    "ignoring envelope for another peer"
                );
                continue;
            }
            return Some(envelope);
        }
        debug!(local_id = %self.local_id, "signaling channel closed");
        None
    }

    /// Broadcast an envelope to the room.
    pub async fn send(&self, envelope: &SignalingEnvelope) -> Result<()> {
        trace!(kind = %envelope.kind(), "broadcasting envelope");
        self.channel.send(envelope).await
    }

    /// Announce arrival; existing members respond by initiating offers.
    pub async fn announce_join(&self) -> Result<()> {
        info!(local_id = %self.local_id, "announcing room join");
        self.send(&SignalingEnvelope::Join {
            sender_id: self.local_id.clone(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryHub;
    use serde_json::json;

    #[tokio::test]
    async fn own_broadcasts_are_discarded_before_dispatch() {
        let hub = MemoryHub::new();
        let alice = ParticipantId::authenticated("alice");
        let bob = ParticipantId::authenticated("bob");

        let mut client_a = SignalingClient::subscribe(&hub, "room:r1", alice.clone())
            .await
            .unwrap();
        let mut client_b = SignalingClient::subscribe(&hub, "room:r1", bob.clone())
            .await
            .unwrap();

        client_a.announce_join().await.unwrap();
        // Bob sees Alice's join; Alice must never see her own.
        assert_eq!(
            client_b.recv().await.unwrap(),
            SignalingEnvelope::Join { sender_id: alice }
        );

        client_b.announce_join().await.unwrap();
        let seen = client_a.recv().await.unwrap();
        assert_eq!(seen.sender_id(), &bob, "first delivery must skip the self-join");
    }

    #[tokio::test]
    async fn targeted_envelopes_for_other_peers_are_ignored() {
        let hub = MemoryHub::new();
        let alice = ParticipantId::authenticated("alice");
        let bob = ParticipantId::authenticated("bob");
        let carol = ParticipantId::authenticated("carol");

        let client_a = SignalingClient::subscribe(&hub, "room:r1", alice.clone())
            .await
            .unwrap();
        let mut client_c = SignalingClient::subscribe(&hub, "room:r1", carol.clone())
            .await
            .unwrap();

        // Offer for Bob, then a join everyone sees.
        client_a
            .send(&SignalingEnvelope::Offer {
                sender_id: alice.clone(),
                target_id: bob,
                sdp: json!({"type": "offer", "sdp": ""}),
            })
            .await
            .unwrap();
        client_a
            .send(&SignalingEnvelope::Join { sender_id: alice })
            .await
            .unwrap();

        let seen = client_c.recv().await.unwrap();
        assert_eq!(
            seen.kind(),
            studymesh_core::SignalKind::Join,
            "offer addressed to bob must be skipped"
        );
    }

    #[tokio::test]
    async fn subscription_failure_aborts() {
        let hub = MemoryHub::new();
        hub.deny_channel("room:locked");
        let err =
            SignalingClient::subscribe(&hub, "room:locked", ParticipantId::authenticated("a"))
                .await
                .unwrap_err();
        assert!(matches!(err, studymesh_core::Error::ChannelSubscriptionFailed(_)));
    }
}
