//! Single-frame capture over RTSP using FFmpeg
//!
//! Each capture is one short-lived `ffmpeg` process: connect, decode one
//! frame, write it to stdout as PPM, exit. The process is spawned with
//! `kill_on_drop`, so the transport session is torn down on every exit
//! path, including the deadline firing mid-read.

use image::{ImageFormat, RgbImage};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, Result};

/// Transport settings used to build stream URLs
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub rtsp_host: String,
    pub rtsp_port: u16,
    /// Application namespace segment of the URL
    pub app: String,
    /// Deadline for connect plus first decoded frame
    pub timeout: Duration,
    /// FFmpeg executable
    pub ffmpeg: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            rtsp_host: "127.0.0.1".to_string(),
            rtsp_port: 554,
            app: "rtp".to_string(),
            timeout: Duration::from_secs(6),
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

/// Pulls one current frame from a live stream
pub struct FrameAcquirer {
    config: CaptureConfig,
}

impl FrameAcquirer {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// `rtsp://{host}:{port}/{app}/{stream}`
    pub fn stream_url(&self, stream_name: &str) -> String {
        format!(
            "rtsp://{}:{}/{}/{}",
            self.config.rtsp_host, self.config.rtsp_port, self.config.app, stream_name
        )
    }

    /// Capture one frame.
    ///
    /// `Ok(None)` when the stream cannot be opened, yields no frame, or the
    /// deadline passes. `Err` only when FFmpeg cannot be run at all or emits
    /// an undecodable frame.
    pub async fn capture(&self, stream_name: &str) -> Result<Option<RgbImage>> {
        let url = self.stream_url(stream_name);
        match self.grab(&url).await {
            Ok(Some(bytes)) if !bytes.is_empty() => decode_frame(&bytes).map(Some),
            Ok(_) => {
                debug!("no frame read from {}", url);
                Ok(None)
            }
            Err(MediaError::Timeout(secs)) => {
                warn!(stream = %stream_name, "no frame within {}s, session killed", secs);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Run FFmpeg against `url`. `None` when FFmpeg exits unsuccessfully.
    async fn grab(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let child = Command::new(&self.config.ffmpeg)
            .args([
                "-hide_banner",
                "-loglevel", "error",
                "-rtsp_transport", "tcp",
                "-i", url,
                "-frames:v", "1",
                "-f", "image2pipe",
                "-vcodec", "ppm",
                "-pix_fmt", "rgb24",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::Capture(format!("spawn {} failed: {}", self.config.ffmpeg, e)))?;

        // Dropping the pending future on timeout drops the child and kills it
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(MediaError::Timeout(self.config.timeout.as_secs())),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                "could not open {} (exit {:?}): {}",
                url,
                output.status.code(),
                stderr.trim()
            );
            return Ok(None);
        }

        Ok(Some(output.stdout))
    }
}

/// Decode a PPM frame into the RGB layout the detector consumes
pub fn decode_frame(bytes: &[u8]) -> Result<RgbImage> {
    let frame = image::load_from_memory_with_format(bytes, ImageFormat::Pnm)?;
    Ok(frame.into_rgb8())
}

/// Check whether FFmpeg is runnable
pub fn check_ffmpeg(ffmpeg: &str) -> bool {
    std::process::Command::new(ffmpeg)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
