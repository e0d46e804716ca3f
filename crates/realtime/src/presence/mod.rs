//! Presence coordination for a study room.
//!
//! Each participant tracks only its own record; the aggregate peer map is
//! rebuilt wholesale from the transport snapshot on every sync event, which
//! makes stale-peer drift impossible by construction.

pub mod policy;

pub use crate::transport::PresenceSnapshot;
pub use policy::ActivityPolicy;

use crate::transport::{PresenceChannel, PresenceEvent, RealtimeTransport};
use parking_lot::Mutex;
use std::sync::Arc;
use studymesh_core::{Identity, PresenceRecord, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Connects one participant to a room's presence channel and maintains the
/// observable peer map.
pub struct PresenceCoordinator {
    channel: Arc<dyn PresenceChannel>,
    current: Mutex<PresenceRecord>,
    peers_tx: watch::Sender<PresenceSnapshot>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PresenceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceCoordinator")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl PresenceCoordinator {
    /// Subscribe to `channel_name` and publish the initial record
    /// (`is_active = false`; nobody starts out studying).
    ///
    /// A subscription failure is returned to the caller, which may choose to
    /// continue with presence degraded; no retry happens here.
    pub async fn join(
        transport: &dyn RealtimeTransport,
        channel_name: &str,
        identity: &Identity,
        activity_label: &str,
    ) -> Result<Self> {
        let channel = transport.presence(channel_name, &identity.id);
        let mut events = channel.subscribe().await?;

        let initial = PresenceRecord::joining(identity.display_name.clone(), activity_label);
        channel.track(initial.clone()).await?;
        info!(channel = %channel_name, key = %identity.id, "joined presence channel");

        let (peers_tx, _) = watch::channel(PresenceSnapshot::new());

        let sync_channel = Arc::clone(&channel);
        let sync_peers = peers_tx.clone();
        let sync_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PresenceEvent::Sync => {
                        // Rebuild from the snapshot, never diff incrementally:
                        // the transport keeps only the latest state per key.
                        let snapshot = sync_channel.presence_state().await;
                        sync_peers.send_replace(snapshot);
                    }
                    PresenceEvent::Joined(key) => debug!(%key, "presence join"),
                    PresenceEvent::Left(key) => debug!(%key, "presence leave"),
                }
            }
        });

        Ok(Self {
            channel,
            current: Mutex::new(initial),
            peers_tx,
            sync_task: Mutex::new(Some(sync_task)),
        })
    }

    /// Observable peer map; receivers see every rebuilt snapshot.
    pub fn peers(&self) -> watch::Receiver<PresenceSnapshot> {
        self.peers_tx.subscribe()
    }

    /// Publish a new activity state for the local participant.
    pub async fn publish_active(&self, is_active: bool) -> Result<()> {
        let record = {
            let mut current = self.current.lock();
            *current = current.with_active(is_active);
            current.clone()
        };
        self.channel.track(record).await
    }

    /// Publish a new activity label for the local participant.
    pub async fn publish_label(&self, label: &str) -> Result<()> {
        let record = {
            let mut current = self.current.lock();
            *current = current.with_label(label);
            current.clone()
        };
        self.channel.track(record).await
    }

    /// Untrack and stop the sync task. Called on room exit.
    pub async fn shutdown(&self) {
        if let Some(task) = self.sync_task.lock().take() {
            task.abort();
        }
        if let Err(err) = self.channel.untrack().await {
            debug!("presence untrack on shutdown failed: {err}");
        }
    }
}
