//! A single peer-to-peer media link.
//!
//! Wraps one `RTCPeerConnection` and exposes the negotiation surface the
//! mesh needs: offer/answer construction, remote description and candidate
//! application, discovered-candidate forwarding, and an observable lifecycle
//! (`New → Negotiating → Connected → Failed/Closed`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use studymesh_core::{Error, ParticipantId, Result, RtcConfig, SignalingEnvelope};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};
use webrtc::api::API;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Lifecycle of one peer link. No automatic retry: a link that reaches
/// `Failed` stays there until the room is re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    New,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

fn rtc_configuration(config: &RtcConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: config.stun_servers.clone(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// One entry in the mesh: the connection toward a single remote peer.
pub struct PeerLink {
    peer_id: ParticipantId,
    pc: Arc<RTCPeerConnection>,
    phase_tx: watch::Sender<LinkPhase>,
    remote_tracks: Arc<RwLock<Vec<Arc<TrackRemote>>>>,
    remote_track_count: watch::Sender<usize>,
    // Cleared on close; every late callback checks it before touching state,
    // so a torn-down link can never be resurrected by an in-flight
    // negotiation continuation.
    live: Arc<AtomicBool>,
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

impl PeerLink {
    /// Create the connection, attach the local tracks, and wire the remote
    /// track and ICE-candidate handlers. Discovered candidates go out as
    /// `candidate` envelopes addressed to `peer_id` via `signal_tx`.
    pub async fn connect(
        api: &API,
        config: &RtcConfig,
        local_id: ParticipantId,
        peer_id: ParticipantId,
        local_tracks: &[Arc<dyn TrackLocal + Send + Sync>],
        signal_tx: mpsc::UnboundedSender<SignalingEnvelope>,
    ) -> Result<Self> {
        let pc = Arc::new(
            api.new_peer_connection(rtc_configuration(config))
                .await
                .map_err(|e| Error::WebRtc(e.to_string()))?,
        );

        // The remote side receives our audio/video through these senders;
        // the track set never changes after this point (no renegotiation).
        for track in local_tracks {
            pc.add_track(Arc::clone(track))
                .await
                .map_err(|e| Error::WebRtc(e.to_string()))?;
        }

        let (phase_tx, _) = watch::channel(LinkPhase::New);
        let (count_tx, _) = watch::channel(0usize);
        let remote_tracks = Arc::new(RwLock::new(Vec::new()));
        let live = Arc::new(AtomicBool::new(true));

        let link = Self {
            peer_id: peer_id.clone(),
            pc: Arc::clone(&pc),
            phase_tx: phase_tx.clone(),
            remote_tracks: Arc::clone(&remote_tracks),
            remote_track_count: count_tx.clone(),
            live: Arc::clone(&live),
        };

        {
            let live = Arc::clone(&live);
            let peer_id = peer_id.clone();
            pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let live = Arc::clone(&live);
                let peer_id = peer_id.clone();
                let local_id = local_id.clone();
                let signal_tx = signal_tx.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else { return };
                    if !live.load(Ordering::Acquire) {
                        return;
                    }
                    let init = match candidate.to_json() {
                        Ok(init) => init,
                        Err(err) => {
                            warn!(%peer_id, "failed to encode ICE candidate: {err}");
                            return;
                        }
                    };
                    let payload = match serde_json::to_value(&init) {
                        Ok(value) => value,
                        Err(err) => {
                            warn!(%peer_id, "failed to serialize ICE candidate: {err}");
                            return;
                        }
                    };
                    let _ = signal_tx.send(SignalingEnvelope::Candidate {
                        sender_id: local_id,
                        target_id: peer_id,
                        candidate: payload,
                    });
                })
            }));
        }

        {
            let live = Arc::clone(&live);
            let peer_id = peer_id.clone();
            let remote_tracks = Arc::clone(&remote_tracks);
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let live = Arc::clone(&live);
                let peer_id = peer_id.clone();
                let remote_tracks = Arc::clone(&remote_tracks);
                let count_tx = count_tx.clone();
                Box::pin(async move {
                    if !live.load(Ordering::Acquire) {
                        return;
                    }
                    info!(%peer_id, kind = %track.kind(), "remote track arrived");
                    let mut tracks = remote_tracks.write().await;
                    tracks.push(track);
                    count_tx.send_replace(tracks.len());
                })
            }));
        }

        {
            let live = Arc::clone(&live);
            let peer_id = peer_id.clone();
            let phase_tx = phase_tx.clone();
            pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let live = Arc::clone(&live);
                let peer_id = peer_id.clone();
                let phase_tx = phase_tx.clone();
                Box::pin(async move {
                    if !live.load(Ordering::Acquire) {
                        return;
                    }
                    debug!(%peer_id, ?state, "connection state change");
                    let phase = match state {
                        RTCPeerConnectionState::Connected => Some(LinkPhase::Connected),
                        // No reconnection policy: a disconnect is terminal.
                        RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Failed => Some(LinkPhase::Failed),
                        RTCPeerConnectionState::Closed => Some(LinkPhase::Closed),
                        _ => None,
                    };
                    if let Some(phase) = phase {
                        phase_tx.send_replace(phase);
                    }
                })
            }));
        }

        Ok(link)
    }

    pub fn peer_id(&self) -> &ParticipantId {
        &self.peer_id
    }

    /// Observable lifecycle, for the UI and for tests.
    pub fn phase(&self) -> watch::Receiver<LinkPhase> {
        self.phase_tx.subscribe()
    }

    /// Number of remote tracks received so far; rises from 0 once the
    /// remote track event fires.
    pub fn remote_track_count(&self) -> watch::Receiver<usize> {
        self.remote_track_count.subscribe()
    }

    pub async fn remote_tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.remote_tracks.read().await.clone()
    }

    /// Initiator path: create the offer, set it locally, and return the
    /// envelope to broadcast.
    pub async fn create_offer(&self, local_id: &ParticipantId) -> Result<SignalingEnvelope> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::NegotiationFailure(e.to_string()))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| Error::NegotiationFailure(e.to_string()))?;
        self.phase_tx.send_replace(LinkPhase::Negotiating);

        Ok(SignalingEnvelope::Offer {
            sender_id: local_id.clone(),
            target_id: self.peer_id.clone(),
            sdp: serde_json::to_value(&offer)?,
        })
    }

    /// Responder path. The remote description MUST be applied before the
    /// answer is created; the negotiation protocol forbids reordering.
    pub async fn accept_offer(
        &self,
        local_id: &ParticipantId,
        sdp: serde_json::Value,
    ) -> Result<SignalingEnvelope> {
        let offer: RTCSessionDescription = serde_json::from_value(sdp)?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::NegotiationFailure(e.to_string()))?;
        self.phase_tx.send_replace(LinkPhase::Negotiating);

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::NegotiationFailure(e.to_string()))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| Error::NegotiationFailure(e.to_string()))?;

        Ok(SignalingEnvelope::Answer {
            sender_id: local_id.clone(),
            target_id: self.peer_id.clone(),
            sdp: serde_json::to_value(&answer)?,
        })
    }

    /// Apply the remote answer to our outstanding offer.
    pub async fn apply_answer(&self, sdp: serde_json::Value) -> Result<()> {
        let answer: RTCSessionDescription = serde_json::from_value(sdp)?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::NegotiationFailure(e.to_string()))
    }

    /// Apply a remote ICE candidate.
    pub async fn add_remote_candidate(&self, candidate: serde_json::Value) -> Result<()> {
        let init: RTCIceCandidateInit = serde_json::from_value(candidate)?;
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::NegotiationFailure(e.to_string()))
    }

    /// Mark the link failed (negotiation error isolated to this peer).
    pub fn mark_failed(&self) {
        self.phase_tx.send_replace(LinkPhase::Failed);
    }

    /// Tear the link down. Late callbacks become no-ops immediately.
    pub async fn close(&self) {
        self.live.store(false, Ordering::Release);
        if let Err(err) = self.pc.close().await {
            debug!(peer_id = %self.peer_id, "error closing peer connection: {err}");
        }
        self.phase_tx.send_replace(LinkPhase::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtc_configuration_carries_stun_servers() {
        let config = RtcConfig::default();
        let rtc = rtc_configuration(&config);
        assert_eq!(rtc.ice_servers.len(), 1);
        assert_eq!(rtc.ice_servers[0].urls, config.stun_servers);
    }
}
