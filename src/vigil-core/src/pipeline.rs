//! Component seams used by the scanner
//!
//! Each step of a channel check sits behind a trait so the scan loop can be
//! driven by the real clients or by in-memory stand-ins.

use async_trait::async_trait;
use image::RgbImage;
use std::sync::Arc;

use vigil_backend::{AlarmEvent, AlarmNotifier, Channel, ChannelDirectory};
use vigil_detect::{DetectError, Detection, Detector};
use vigil_media::{FrameAcquirer, MediaError, ResolvedStream, StreamResolver};

#[async_trait]
pub trait ChannelSource: Send + Sync {
    /// Channels of every online device; empty when discovery fails
    async fn list_active_channels(&self) -> Vec<Channel>;
}

#[async_trait]
pub trait StreamLookup: Send + Sync {
    /// Stream name for a channel; falls back to the channel id
    async fn resolve(&self, channel_id: &str) -> ResolvedStream;
}

#[async_trait]
pub trait FrameSource: Send + Sync {
    /// One current frame, or `None` when the stream yields nothing
    async fn capture(&self, stream_name: &str) -> Result<Option<RgbImage>, MediaError>;
}

#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectError>;
}

#[async_trait]
pub trait AlarmSink: Send + Sync {
    /// Submit an alarm; `false` when the backend did not accept it
    async fn notify(&self, event: &AlarmEvent) -> bool;
}

#[async_trait]
impl ChannelSource for ChannelDirectory {
    async fn list_active_channels(&self) -> Vec<Channel> {
        ChannelDirectory::list_active_channels(self).await
    }
}

#[async_trait]
impl StreamLookup for StreamResolver {
    async fn resolve(&self, channel_id: &str) -> ResolvedStream {
        StreamResolver::resolve(self, channel_id).await
    }
}

#[async_trait]
impl FrameSource for FrameAcquirer {
    async fn capture(&self, stream_name: &str) -> Result<Option<RgbImage>, MediaError> {
        FrameAcquirer::capture(self, stream_name).await
    }
}

/// Inference runs on the blocking pool so a slow model does not stall the
/// runtime's worker threads.
#[async_trait]
impl ObjectDetector for Arc<Detector> {
    async fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        let detector = Arc::clone(self);
        let frame = frame.clone();
        tokio::task::spawn_blocking(move || Detector::detect(&detector, &frame))
            .await
            .map_err(|e| DetectError::Inference(format!("detector task failed: {}", e)))?
    }
}

#[async_trait]
impl AlarmSink for AlarmNotifier {
    async fn notify(&self, event: &AlarmEvent) -> bool {
        AlarmNotifier::notify(self, event).await
    }
}

/// The components a scanner drives, in call order
#[derive(Clone)]
pub struct Pipeline {
    pub channels: Arc<dyn ChannelSource>,
    pub streams: Arc<dyn StreamLookup>,
    pub frames: Arc<dyn FrameSource>,
    pub detector: Arc<dyn ObjectDetector>,
    pub alarms: Arc<dyn AlarmSink>,
}
