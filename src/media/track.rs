use std::sync::Arc;

use async_trait::async_trait;
use webrtc::api::media_engine::MIME_TYPE_H264;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::media::types::BitstreamSample;

#[derive(Debug, thiserror::Error)]
pub enum TrackWriteError {
    /// Every output pipe went away; expected while viewers disconnect.
    #[error("output pipe closed")]
    ClosedPipe,
    #[error("write sample: {0}")]
    Transport(webrtc::Error),
}

impl From<webrtc::Error> for TrackWriteError {
    fn from(err: webrtc::Error) -> Self {
        if is_closed_pipe(&err) {
            TrackWriteError::ClosedPipe
        } else {
            TrackWriteError::Transport(err)
        }
    }
}

/// The track flattens per-binding write errors into one message, so the
/// closed-pipe case is recognised by its rendering as well as its variant.
fn is_closed_pipe(err: &webrtc::Error) -> bool {
    if matches!(err, webrtc::Error::ErrClosedPipe) {
        return true;
    }
    let closed = webrtc::Error::ErrClosedPipe.to_string();
    let rendered = err.to_string();
    !rendered.is_empty() && rendered.lines().all(|line| line.contains(&closed))
}

/// Where the ingest session delivers finished samples.
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn write_sample(&self, sample: &BitstreamSample) -> Result<(), TrackWriteError>;
}

/// The single H.264 track every viewer's peer connection subscribes to.
///
/// Writes go to the bindings present at call time; a viewer added later only
/// sees samples written after its binding exists.
pub struct OutboundTrack {
    inner: Arc<TrackLocalStaticSample>,
}

impl OutboundTrack {
    pub fn new() -> Self {
        let inner = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "rtsp-relay".to_owned(),
        ));
        Self { inner }
    }

    /// Handle for `RTCPeerConnection::add_track`.
    pub fn track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.inner) as Arc<dyn TrackLocal + Send + Sync>
    }
}

impl Default for OutboundTrack {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleSink for OutboundTrack {
    async fn write_sample(&self, sample: &BitstreamSample) -> Result<(), TrackWriteError> {
        let sample = Sample {
            data: sample.data.clone(),
            duration: sample.duration,
            ..Default::default()
        };
        self.inner.write_sample(&sample).await?;
        Ok(())
    }
}
