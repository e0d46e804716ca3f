//! Mesh membership: one [`PeerLink`] per remote participant.
//!
//! The registry owns the shared WebRTC API object and the peer map, enforces
//! the mesh size limit, and routes inbound signaling to the right link. A
//! signaling message for a peer with no live link is stale by definition and
//! is dropped with a debug log.

use super::connection::{LinkPhase, PeerLink};
use crate::media::LocalMediaController;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use studymesh_core::{Error, ParticipantId, Result, RoomConfig, SignalingEnvelope};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::interceptor::registry::Registry;

/// Counters for the signaling traffic this node has produced and consumed.
#[derive(Debug, Default)]
pub struct SignalingStats {
    pub offers_sent: AtomicU64,
    pub answers_sent: AtomicU64,
    pub candidates_applied: AtomicU64,
    pub stale_dropped: AtomicU64,
}

impl SignalingStats {
    pub fn offers_sent(&self) -> u64 {
        self.offers_sent.load(Ordering::Relaxed)
    }

    pub fn answers_sent(&self) -> u64 {
        self.answers_sent.load(Ordering::Relaxed)
    }

    pub fn candidates_applied(&self) -> u64 {
        self.candidates_applied.load(Ordering::Relaxed)
    }

    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped.load(Ordering::Relaxed)
    }
}

fn build_api() -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| Error::WebRtc(e.to_string()))?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(|e| Error::WebRtc(e.to_string()))?;
    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Holds every live peer link for one room participation.
pub struct PeerRegistry {
    api: API,
    config: RoomConfig,
    local_id: ParticipantId,
    media: Arc<LocalMediaController>,
    links: RwLock<HashMap<ParticipantId, Arc<PeerLink>>>,
    // Outbound envelopes (offers, answers, discovered candidates) drain
    // through here to the session's broadcast loop.
    signal_tx: mpsc::UnboundedSender<SignalingEnvelope>,
    stats: Arc<SignalingStats>,
}

impl PeerRegistry {
    pub fn new(
        config: RoomConfig,
        local_id: ParticipantId,
        media: Arc<LocalMediaController>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SignalingEnvelope>)> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let registry = Self {
            api: build_api()?,
            config,
            local_id,
            media,
            links: RwLock::new(HashMap::new()),
            signal_tx,
            stats: Arc::new(SignalingStats::default()),
        };
        Ok((registry, signal_rx))
    }

    pub fn stats(&self) -> Arc<SignalingStats> {
        Arc::clone(&self.stats)
    }

    pub async fn link(&self, peer_id: &ParticipantId) -> Option<Arc<PeerLink>> {
        self.links.read().await.get(peer_id).cloned()
    }

    pub async fn link_phases(&self) -> HashMap<ParticipantId, LinkPhase> {
        let links = self.links.read().await;
        let mut phases = HashMap::with_capacity(links.len());
        for (peer_id, link) in links.iter() {
            phases.insert(peer_id.clone(), *link.phase().borrow());
        }
        phases
    }

    pub async fn len(&self) -> usize {
        self.links.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.links.read().await.is_empty()
    }

    /// Get or create the link toward `peer_id`. Idempotent: an existing link
    /// is returned untouched, with no second offer.
    ///
    /// When `initiate` is set and the link is new, an offer is created and
    /// pushed to the outbound queue.
    pub async fn ensure_connection(
        &self,
        peer_id: &ParticipantId,
        initiate: bool,
    ) -> Result<Arc<PeerLink>> {
        if let Some(existing) = self.link(peer_id).await {
            debug!(%peer_id, "connection already exists, skipping");
            return Ok(existing);
        }

        let mut links = self.links.write().await;
        // Re-check under the write lock; a concurrent caller may have won.
        if let Some(existing) = links.get(peer_id) {
            return Ok(Arc::clone(existing));
        }
        if links.len() >= self.config.max_peers {
            return Err(Error::PeerLimitExceeded(self.config.max_peers));
        }

        let link = Arc::new(
            PeerLink::connect(
                &self.api,
                &self.config.rtc,
                self.local_id.clone(),
                peer_id.clone(),
                &self.media.local_tracks(),
                self.signal_tx.clone(),
            )
            .await?,
        );
        links.insert(peer_id.clone(), Arc::clone(&link));
        drop(links);

        info!(%peer_id, initiate, "peer link created");

        if initiate {
            match link.create_offer(&self.local_id).await {
                Ok(offer) => {
                    self.stats.offers_sent.fetch_add(1, Ordering::Relaxed);
                    let _ = self.signal_tx.send(offer);
                }
                Err(err) => {
                    // Failure is isolated to this peer; the rest of the mesh
                    // keeps going.
                    warn!(%peer_id, "offer creation failed: {err}");
                    link.mark_failed();
                }
            }
        }

        Ok(link)
    }

    /// An offer arrived: ensure a responder-side link exists, apply the
    /// remote description, and queue the answer.
    pub async fn handle_offer(
        &self,
        sender_id: &ParticipantId,
        sdp: serde_json::Value,
    ) -> Result<()> {
        let link = self.ensure_connection(sender_id, false).await?;
        match link.accept_offer(&self.local_id, sdp).await {
            Ok(answer) => {
                self.stats.answers_sent.fetch_add(1, Ordering::Relaxed);
                let _ = self.signal_tx.send(answer);
                Ok(())
            }
            Err(err) => {
                warn!(peer_id = %sender_id, "answer creation failed: {err}");
                link.mark_failed();
                Err(err)
            }
        }
    }

    /// An answer arrived for an offer we sent earlier.
    pub async fn handle_answer(
        &self,
        sender_id: &ParticipantId,
        sdp: serde_json::Value,
    ) -> Result<()> {
        let Some(link) = self.link(sender_id).await else {
            self.stats.stale_dropped.fetch_add(1, Ordering::Relaxed);
            debug!(peer_id = %sender_id, "dropping answer for unknown peer");
            return Ok(());
        };
        if let Err(err) = link.apply_answer(sdp).await {
            warn!(peer_id = %sender_id, "applying answer failed: {err}");
            link.mark_failed();
        }
        Ok(())
    }

    /// A remote ICE candidate arrived.
    pub async fn handle_candidate(
        &self,
        sender_id: &ParticipantId,
        candidate: serde_json::Value,
    ) -> Result<()> {
        let Some(link) = self.link(sender_id).await else {
            self.stats.stale_dropped.fetch_add(1, Ordering::Relaxed);
            debug!(peer_id = %sender_id, "dropping candidate for unknown peer");
            return Ok(());
        };
        match link.add_remote_candidate(candidate).await {
            Ok(()) => {
                self.stats.candidates_applied.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                // Individual candidates may fail without dooming the link.
                debug!(peer_id = %sender_id, "candidate rejected: {err}");
            }
        }
        Ok(())
    }

    /// Close one link, e.g. when that participant leaves the room.
    pub async fn close_peer(&self, peer_id: &ParticipantId) {
        if let Some(link) = self.links.write().await.remove(peer_id) {
            link.close().await;
            info!(%peer_id, "peer link closed");
        }
    }

    /// Tear down the whole mesh. Called on room exit.
    pub async fn close_all(&self) {
        let links: Vec<_> = self.links.write().await.drain().collect();
        for (peer_id, link) in links {
            link.close().await;
            debug!(%peer_id, "peer link closed during teardown");
        }
    }
}
