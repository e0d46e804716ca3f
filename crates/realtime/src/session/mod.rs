//! Room session lifecycle.
//!
//! One [`RoomSession`] per participant per room. Entry acquires local media,
//! subscribes both channels, announces the join, and starts the event loop
//! that routes signaling into the peer registry. Exit tears all of it down in
//! reverse. The session is the only writer of its state machine:
//! `Idle → Joining → Joined → Leaving → Idle`.

use crate::media::{LocalMediaController, MediaSource};
use crate::peer::{LinkPhase, PeerRegistry, SignalingStats};
use crate::presence::{ActivityPolicy, PresenceCoordinator, PresenceSnapshot};
use crate::signaling::SignalingClient;
use crate::transport::RealtimeTransport;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use studymesh_core::{Error, Identity, ParticipantId, Result, RoomConfig};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Idle,
    Joining,
    Joined,
    Leaving,
}

/// Everything that only exists while the room is joined.
struct ActiveRoom {
    registry: Arc<PeerRegistry>,
    presence: Option<Arc<PresenceCoordinator>>,
    shutdown_tx: mpsc::Sender<()>,
    event_loop: JoinHandle<()>,
}

/// A participant's handle on one room.
pub struct RoomSession {
    config: RoomConfig,
    identity: Identity,
    transport: Arc<dyn RealtimeTransport>,
    media: Arc<LocalMediaController>,
    activity_label: SyncMutex<String>,
    policy: SyncMutex<ActivityPolicy>,
    state_tx: watch::Sender<RoomState>,
    active: Mutex<Option<ActiveRoom>>,
}

impl RoomSession {
    pub fn new(
        config: RoomConfig,
        identity: Identity,
        transport: Arc<dyn RealtimeTransport>,
        media_source: Arc<dyn MediaSource>,
    ) -> Self {
        let (state_tx, _) = watch::channel(RoomState::Idle);
        Self {
            config,
            identity,
            transport,
            media: Arc::new(LocalMediaController::new(media_source)),
            activity_label: SyncMutex::new(String::new()),
            policy: SyncMutex::new(ActivityPolicy::new()),
            state_tx,
            active: Mutex::new(None),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.identity.id
    }

    pub fn media(&self) -> &LocalMediaController {
        &self.media
    }

    /// Observable lifecycle state.
    pub fn state(&self) -> watch::Receiver<RoomState> {
        self.state_tx.subscribe()
    }

    fn current_state(&self) -> RoomState {
        *self.state_tx.borrow()
    }

    /// Enter the room with the given activity label.
    ///
    /// Media denial and signaling subscription failure abort the entry and
    /// roll the state back to `Idle`. A presence subscription failure does
    /// not: the session continues with the peer map degraded to empty.
    pub async fn enter_room(&self, activity_label: &str) -> Result<()> {
        let mut active = self.active.lock().await;
        if active.is_some() || self.current_state() != RoomState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot enter room in state {:?}",
                self.current_state()
            )));
        }
        self.state_tx.send_replace(RoomState::Joining);
        *self.activity_label.lock() = activity_label.to_string();
        // Entry always starts from a clean slate: the initial presence record
        // says "not studying", and the policy must agree or later toggles
        // would be treated as no-ops.
        *self.policy.lock() = ActivityPolicy::new();

        // Without media there is nothing to share; entry fails outright.
        if let Err(err) = self.media.acquire().await {
            self.state_tx.send_replace(RoomState::Idle);
            return Err(err);
        }

        let mut client = match SignalingClient::subscribe(
            self.transport.as_ref(),
            &self.config.signaling_channel(),
            self.identity.id.clone(),
        )
        .await
        {
            Ok(client) => client,
            Err(err) => {
                self.abort_entry(None).await;
                return Err(err);
            }
        };

        // Presence is best-effort: the mesh works without it.
        let presence = match PresenceCoordinator::join(
            self.transport.as_ref(),
            &self.config.presence_channel(),
            &self.identity,
            activity_label,
        )
        .await
        {
            Ok(coordinator) => Some(Arc::new(coordinator)),
            Err(err) => {
                warn!(room = %self.config.room_id, "presence degraded: {err}");
                None
            }
        };

        let (registry, mut outbound) = match PeerRegistry::new(
            self.config.clone(),
            self.identity.id.clone(),
            Arc::clone(&self.media),
        ) {
            Ok(pair) => pair,
            Err(err) => {
                self.abort_entry(presence.as_deref()).await;
                return Err(err);
            }
        };
        let registry = Arc::new(registry);

        if let Err(err) = client.announce_join().await {
            self.abort_entry(presence.as_deref()).await;
            return Err(err);
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let loop_registry = Arc::clone(&registry);
        let room_id = self.config.room_id.clone();
        let event_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(room = %room_id, "event loop shutting down");
                        break;
                    }
                    envelope = client.recv() => {
                        let Some(envelope) = envelope else {
                            warn!(room = %room_id, "signaling channel closed, stopping loop");
                            break;
                        };
                        route_envelope(&loop_registry, envelope).await;
                    }
                    queued = outbound.recv() => {
                        // Registry outbound: offers, answers, candidates.
                        let Some(queued) = queued else { break };
                        if let Err(err) = client.send(&queued).await {
                            warn!(room = %room_id, "failed to broadcast envelope: {err}");
                        }
                    }
                }
            }
        });

        *active = Some(ActiveRoom {
            registry,
            presence,
            shutdown_tx,
            event_loop,
        });
        self.state_tx.send_replace(RoomState::Joined);
        info!(room = %self.config.room_id, participant = %self.identity.id, "room joined");
        Ok(())
    }

    /// Undo a partially-completed entry. Every failure after the `Joining`
    /// transition must come through here so the session is re-enterable.
    async fn abort_entry(&self, presence: Option<&PresenceCoordinator>) {
        if let Some(presence) = presence {
            presence.shutdown().await;
        }
        self.media.release();
        self.state_tx.send_replace(RoomState::Idle);
    }

    /// Leave the room, tearing down the mesh, media and presence. A no-op
    /// when the room is not joined.
    pub async fn leave_room(&self) {
        let mut active = self.active.lock().await;
        let Some(room) = active.take() else {
            debug!(room = %self.config.room_id, "leave ignored, not joined");
            return;
        };
        self.state_tx.send_replace(RoomState::Leaving);

        let _ = room.shutdown_tx.send(()).await;
        if let Err(err) = room.event_loop.await {
            debug!("event loop join failed: {err}");
        }
        room.registry.close_all().await;
        if let Some(presence) = &room.presence {
            presence.shutdown().await;
        }
        self.media.release();
        *self.policy.lock() = ActivityPolicy::new();

        self.state_tx.send_replace(RoomState::Idle);
        info!(room = %self.config.room_id, participant = %self.identity.id, "room left");
    }

    /// Flip the explicit study toggle. Publishes only when the derived
    /// activity bit actually changes.
    pub async fn set_studying(&self, studying: bool) -> Result<()> {
        let change = self.policy.lock().set_studying(studying);
        self.publish_activity(change).await
    }

    /// Report a page visibility change. Same publish-on-transition rule as
    /// the study toggle.
    pub async fn set_page_visible(&self, visible: bool) -> Result<()> {
        let change = self.policy.lock().set_visible(visible);
        self.publish_activity(change).await
    }

    async fn publish_activity(&self, change: Option<bool>) -> Result<()> {
        let Some(is_active) = change else {
            // No transition in the derived bit, nothing to publish.
            return Ok(());
        };
        let active = self.active.lock().await;
        if let Some(presence) = active.as_ref().and_then(|room| room.presence.as_ref()) {
            presence.publish_active(is_active).await?;
        }
        Ok(())
    }

    /// Update the activity label shown to other participants.
    pub async fn set_activity_label(&self, label: &str) -> Result<()> {
        *self.activity_label.lock() = label.to_string();
        let active = self.active.lock().await;
        if let Some(presence) = active.as_ref().and_then(|room| room.presence.as_ref()) {
            presence.publish_label(label).await?;
        }
        Ok(())
    }

    pub fn activity_label(&self) -> String {
        self.activity_label.lock().clone()
    }

    pub fn is_studying(&self) -> bool {
        self.policy.lock().is_studying()
    }

    pub fn is_active(&self) -> bool {
        self.policy.lock().is_active()
    }

    /// Observable peer presence map, when presence is up.
    pub async fn peers(&self) -> Option<watch::Receiver<PresenceSnapshot>> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .and_then(|room| room.presence.as_ref())
            .map(|presence| presence.peers())
    }

    /// Current phase of every peer link.
    pub async fn link_phases(&self) -> HashMap<ParticipantId, LinkPhase> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(room) => room.registry.link_phases().await,
            None => HashMap::new(),
        }
    }

    pub async fn registry(&self) -> Option<Arc<PeerRegistry>> {
        self.active.lock().await.as_ref().map(|room| Arc::clone(&room.registry))
    }

    pub async fn stats(&self) -> Option<Arc<SignalingStats>> {
        self.active.lock().await.as_ref().map(|room| room.registry.stats())
    }
}

async fn route_envelope(registry: &PeerRegistry, envelope: studymesh_core::SignalingEnvelope) {
    use studymesh_core::SignalingEnvelope as E;
    match envelope {
        E::Join { sender_id } => {
            // Existing members initiate toward the newcomer; the newcomer
            // only answers.
            if let Err(err) = registry.ensure_connection(&sender_id, true).await {
                warn!(peer_id = %sender_id, "cannot connect to joining peer: {err}");
            }
        }
        E::Offer { sender_id, sdp, .. } => {
            if let Err(err) = registry.handle_offer(&sender_id, sdp).await {
                warn!(peer_id = %sender_id, "offer handling failed: {err}");
            }
        }
        E::Answer { sender_id, sdp, .. } => {
            if let Err(err) = registry.handle_answer(&sender_id, sdp).await {
                warn!(peer_id = %sender_id, "answer handling failed: {err}");
            }
        }
        E::Candidate {
            sender_id,
            candidate,
            ..
        } => {
            if let Err(err) = registry.handle_candidate(&sender_id, candidate).await {
                warn!(peer_id = %sender_id, "candidate handling failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{LocalTracks, MediaToggles, SilentMediaSource};
    use crate::transport::MemoryHub;
    use async_trait::async_trait;

    fn session(hub: &MemoryHub, name: &str) -> RoomSession {
        RoomSession::new(
            RoomConfig::new("r1"),
            Identity::new(ParticipantId::authenticated(name), name.to_string()),
            Arc::new(hub.clone()),
            Arc::new(SilentMediaSource),
        )
    }

    struct DeniedSource;

    #[async_trait]
    impl MediaSource for DeniedSource {
        async fn open(&self, _toggles: MediaToggles) -> Result<LocalTracks> {
            Err(Error::MediaAccessDenied("no devices".into()))
        }
    }

    #[tokio::test]
    async fn enter_twice_is_rejected() {
        let hub = MemoryHub::new();
        let session = session(&hub, "alice");
        session.enter_room("maths").await.unwrap();
        assert_eq!(*session.state().borrow(), RoomState::Joined);

        let err = session.enter_room("maths").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        session.leave_room().await;
    }

    #[tokio::test]
    async fn leave_without_join_is_a_noop() {
        let hub = MemoryHub::new();
        let session = session(&hub, "alice");
        session.leave_room().await;
        assert_eq!(*session.state().borrow(), RoomState::Idle);
    }

    #[tokio::test]
    async fn media_denial_rolls_back_to_idle() {
        let hub = MemoryHub::new();
        let session = RoomSession::new(
            RoomConfig::new("r1"),
            Identity::new(ParticipantId::authenticated("alice"), "alice"),
            Arc::new(hub),
            Arc::new(DeniedSource),
        );
        let err = session.enter_room("maths").await.unwrap_err();
        assert!(matches!(err, Error::MediaAccessDenied(_)));
        assert_eq!(*session.state().borrow(), RoomState::Idle);
    }

    #[tokio::test]
    async fn signaling_failure_aborts_and_releases_media() {
        let hub = MemoryHub::new();
        hub.deny_channel("room:r1");
        let session = session(&hub, "alice");
        let err = session.enter_room("maths").await.unwrap_err();
        assert!(matches!(err, Error::ChannelSubscriptionFailed(_)));
        assert_eq!(*session.state().borrow(), RoomState::Idle);
        assert!(session.media().local_tracks().is_empty());
    }

    #[tokio::test]
    async fn presence_failure_degrades_instead_of_aborting() {
        let hub = MemoryHub::new();
        hub.deny_channel("room_r1");
        let session = session(&hub, "alice");
        session.enter_room("maths").await.unwrap();
        assert_eq!(*session.state().borrow(), RoomState::Joined);
        assert!(session.peers().await.is_none());
        session.leave_room().await;
    }

    async fn wait_for_own_record<F>(session: &RoomSession, mut pred: F)
    where
        F: FnMut(&studymesh_core::PresenceRecord) -> bool,
    {
        let mut rx = session.peers().await.expect("presence is up");
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            if rx.borrow().get(session.local_id()).is_some_and(&mut pred) {
                return;
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            tokio::time::timeout(remaining, rx.changed())
                .await
                .expect("own presence record never matched")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn reentry_starts_from_a_clean_slate() {
        let hub = MemoryHub::new();
        let session = session(&hub, "alice");

        session.enter_room("maths").await.unwrap();
        session.set_studying(true).await.unwrap();
        wait_for_own_record(&session, |r| r.is_active).await;

        session.leave_room().await;
        assert!(!session.is_studying(), "study toggle must not survive a leave");

        // The rejoin publishes an inactive record, and the toggle must still
        // be able to flip it back on.
        session.enter_room("maths").await.unwrap();
        wait_for_own_record(&session, |r| !r.is_active).await;
        session.set_studying(true).await.unwrap();
        wait_for_own_record(&session, |r| r.is_active).await;
        session.leave_room().await;
    }

    #[tokio::test]
    async fn failed_entry_is_rolled_back_and_retryable() {
        let hub = MemoryHub::new();
        hub.deny_channel("room:r1");
        let session = session(&hub, "alice");

        session.enter_room("maths").await.unwrap_err();
        assert_eq!(*session.state().borrow(), RoomState::Idle);
        assert!(session.media().local_tracks().is_empty());
        session.leave_room().await;
        assert_eq!(*session.state().borrow(), RoomState::Idle);

        hub.allow_channel("room:r1");
        session.enter_room("maths").await.unwrap();
        assert_eq!(*session.state().borrow(), RoomState::Joined);
        session.leave_room().await;
    }

    #[tokio::test]
    async fn leave_resets_for_reentry() {
        let hub = MemoryHub::new();
        let session = session(&hub, "alice");
        session.enter_room("maths").await.unwrap();
        session.leave_room().await;
        assert_eq!(*session.state().borrow(), RoomState::Idle);

        session.enter_room("physics").await.unwrap();
        assert_eq!(*session.state().borrow(), RoomState::Joined);
        session.leave_room().await;
    }
}
