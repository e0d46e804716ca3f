//! Local media session: capture tracks, mute/video toggles, release.
//!
//! Mute and video-off flip enabled flags that the capture source consults per
//! frame, substituting silence/black output instead of removing the track.
//! No toggle ever triggers renegotiation; the track set attached to peer
//! connections is fixed for the lifetime of the room session.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use studymesh_core::{Error, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

// Opus DTX frame, 20 ms of silence.
const OPUS_SILENCE: &[u8] = &[0xf8, 0xff, 0xfe];
const AUDIO_FRAME: Duration = Duration::from_millis(20);

/// Enabled flags shared between the controller and a capture source. A
/// source must emit silence/black frames while the matching flag is off.
#[derive(Clone, Default)]
pub struct MediaToggles {
    audio: Arc<AtomicBool>,
    video: Arc<AtomicBool>,
}

impl MediaToggles {
    fn new() -> Self {
        let toggles = Self::default();
        toggles.audio.store(true, Ordering::Relaxed);
        toggles.video.store(true, Ordering::Relaxed);
        toggles
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio.load(Ordering::Relaxed)
    }

    pub fn video_enabled(&self) -> bool {
        self.video.load(Ordering::Relaxed)
    }
}

/// The track set produced by a capture source, plus any feeder tasks that
/// push samples into the tracks.
pub struct LocalTracks {
    pub audio: Option<Arc<TrackLocalStaticSample>>,
    pub video: Option<Arc<TrackLocalStaticSample>>,
    pub feeders: Vec<JoinHandle<()>>,
}

impl LocalTracks {
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

/// Source of local capture tracks.
///
/// Opening may prompt the user and wait indefinitely for a grant; a decline
/// or missing device surfaces as [`Error::MediaAccessDenied`] from the
/// controller.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn open(&self, toggles: MediaToggles) -> Result<LocalTracks>;
}

/// Source producing an Opus track fed with silence frames and a VP8 track
/// that carries no samples. Enough to drive negotiation in tests and demos
/// where no capture hardware exists.
#[derive(Default)]
pub struct SilentMediaSource;

#[async_trait]
impl MediaSource for SilentMediaSource {
    async fn open(&self, _toggles: MediaToggles) -> Result<LocalTracks> {
        let audio = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "studymesh-audio".to_owned(),
        ));
        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "studymesh-video".to_owned(),
        ));

        // Writes are dropped by the track until a peer connection binds it,
        // so the feeder can start immediately.
        let feeder_track = Arc::clone(&audio);
        let feeder = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(AUDIO_FRAME);
            loop {
                ticker.tick().await;
                let sample = Sample {
                    data: Bytes::from_static(OPUS_SILENCE),
                    duration: AUDIO_FRAME,
                    ..Default::default()
                };
                if let Err(err) = feeder_track.write_sample(&sample).await {
                    trace!("silence feeder stopping: {err}");
                    break;
                }
            }
        });

        Ok(LocalTracks {
            audio: Some(audio),
            video: Some(video),
            feeders: vec![feeder],
        })
    }
}

/// Owns the local capture session for one room participation.
pub struct LocalMediaController {
    source: Arc<dyn MediaSource>,
    toggles: MediaToggles,
    session: Mutex<Option<LocalTracks>>,
}

impl LocalMediaController {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self {
            source,
            toggles: MediaToggles::new(),
            session: Mutex::new(None),
        }
    }

    /// Request the capture tracks. Fails with [`Error::MediaAccessDenied`]
    /// when the source declines or yields no tracks; callers must surface
    /// this, since downstream connection setup depends on having tracks.
    pub async fn acquire(&self) -> Result<Vec<Arc<dyn TrackLocal + Send + Sync>>> {
        if self.session.lock().is_some() {
            return Err(Error::InvalidState("media already acquired".into()));
        }

        let tracks = self
            .source
            .open(self.toggles.clone())
            .await
            .map_err(|err| match err {
                denied @ Error::MediaAccessDenied(_) => denied,
                other => Error::MediaAccessDenied(other.to_string()),
            })?;
        if tracks.is_empty() {
            return Err(Error::MediaAccessDenied(
                "capture source produced no tracks".into(),
            ));
        }

        let attachable = Self::attachable(&tracks);
        info!(
            audio = tracks.audio.is_some(),
            video = tracks.video.is_some(),
            "local media acquired"
        );
        *self.session.lock() = Some(tracks);
        Ok(attachable)
    }

    fn attachable(tracks: &LocalTracks) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        let mut out: Vec<Arc<dyn TrackLocal + Send + Sync>> = Vec::new();
        if let Some(audio) = &tracks.audio {
            out.push(Arc::clone(audio) as Arc<dyn TrackLocal + Send + Sync>);
        }
        if let Some(video) = &tracks.video {
            out.push(Arc::clone(video) as Arc<dyn TrackLocal + Send + Sync>);
        }
        out
    }

    /// The tracks to attach to a new peer connection, if acquired.
    pub fn local_tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        self.session
            .lock()
            .as_ref()
            .map(Self::attachable)
            .unwrap_or_default()
    }

    /// Mute/unmute. Flag-only: the track stays attached, the source sends
    /// silence while disabled, and no renegotiation happens.
    pub fn set_audio_enabled(&self, enabled: bool) {
        self.toggles.audio.store(enabled, Ordering::Relaxed);
        debug!(enabled, "audio toggle");
    }

    /// Camera on/off. Flag-only, same contract as audio.
    pub fn set_video_enabled(&self, enabled: bool) {
        self.toggles.video.store(enabled, Ordering::Relaxed);
        debug!(enabled, "video toggle");
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.toggles.audio_enabled()
    }

    pub fn is_video_enabled(&self) -> bool {
        self.toggles.video_enabled()
    }

    /// Stop feeders and drop the tracks. Idempotent.
    pub fn release(&self) {
        if let Some(tracks) = self.session.lock().take() {
            for feeder in &tracks.feeders {
                feeder.abort();
            }
            info!("local media released");
        }
    }
}

impl Drop for LocalMediaController {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Source that always declines, like a user rejecting the permission
    /// prompt.
    struct DeniedSource;

    #[async_trait]
    impl MediaSource for DeniedSource {
        async fn open(&self, _toggles: MediaToggles) -> Result<LocalTracks> {
            Err(Error::MediaAccessDenied("permission dismissed".into()))
        }
    }

    #[tokio::test]
    async fn acquire_produces_attachable_tracks() {
        let controller = LocalMediaController::new(Arc::new(SilentMediaSource));
        let tracks = controller.acquire().await.unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(controller.local_tracks().len(), 2);
    }

    #[tokio::test]
    async fn denied_source_surfaces_media_access_denied() {
        let controller = LocalMediaController::new(Arc::new(DeniedSource));
        let err = controller.acquire().await.err().unwrap();
        assert!(matches!(err, Error::MediaAccessDenied(_)));
        assert!(controller.local_tracks().is_empty());
    }

    #[tokio::test]
    async fn toggles_never_change_the_track_set() {
        let controller = LocalMediaController::new(Arc::new(SilentMediaSource));
        controller.acquire().await.unwrap();
        let before = controller.local_tracks().len();

        controller.set_audio_enabled(false);
        controller.set_video_enabled(false);
        controller.set_audio_enabled(true);

        assert_eq!(controller.local_tracks().len(), before);
        assert!(controller.is_audio_enabled());
        assert!(!controller.is_video_enabled());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let controller = LocalMediaController::new(Arc::new(SilentMediaSource));
        controller.acquire().await.unwrap();
        controller.release();
        controller.release();
        assert!(controller.local_tracks().is_empty());
    }
}
