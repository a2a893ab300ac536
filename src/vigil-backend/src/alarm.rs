//! Person-detection alarm submission

use chrono::Utc;
use image::{ImageFormat, RgbImage};
use reqwest::multipart::{Form, Part};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{BackendError, Result};
use crate::session::SessionManager;

/// JPEG file name reported with every alarm upload
const SNAPSHOT_FILE_NAME: &str = "snapshot.jpg";

/// One detection event ready for submission
#[derive(Debug, Clone)]
pub struct AlarmEvent {
    /// External device identifier
    pub device_id: String,
    pub channel_id: String,
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// JPEG-encoded frame
    pub jpeg: Vec<u8>,
}

impl AlarmEvent {
    /// Build an event for a frame captured now
    pub fn capture(
        device_id: impl Into<String>,
        channel_id: impl Into<String>,
        frame: &RgbImage,
    ) -> Result<Self> {
        Ok(Self {
            device_id: device_id.into(),
            channel_id: channel_id.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
            jpeg: encode_jpeg(frame)?,
        })
    }

    /// File name used for local copies of this event's frame
    pub fn snapshot_file_name(&self) -> String {
        format!("{}_{}_{}.jpg", self.device_id, self.channel_id, self.timestamp_ms)
    }

    fn form(&self) -> Result<Form> {
        let file = Part::bytes(self.jpeg.clone())
            .file_name(SNAPSHOT_FILE_NAME)
            .mime_str("image/jpeg")?;

        Ok(Form::new()
            .text("deviceId", self.device_id.clone())
            .text("channelId", self.channel_id.clone())
            .text("timestamp", self.timestamp_ms.to_string())
            .part("file", file))
    }
}

/// Encode an RGB frame as JPEG
pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    frame.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)?;
    Ok(jpeg)
}

/// Submits alarms to `POST /api/alarms`
pub struct AlarmNotifier {
    session: Arc<SessionManager>,
}

impl AlarmNotifier {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    /// Submit an alarm, logging any failure. No retry beyond the single
    /// re-login performed by the session.
    pub async fn notify(&self, event: &AlarmEvent) -> bool {
        match self.submit(event).await {
            Ok(()) => {
                info!(
                    device_id = %event.device_id,
                    channel_id = %event.channel_id,
                    "alarm submitted ({} bytes)",
                    event.jpeg.len()
                );
                true
            }
            Err(e) => {
                warn!(
                    device_id = %event.device_id,
                    channel_id = %event.channel_id,
                    "alarm submission failed: {}", e
                );
                false
            }
        }
    }

    /// Submit an alarm, returning the failure
    pub async fn submit(&self, event: &AlarmEvent) -> Result<()> {
        let url = self.session.url("/api/alarms");
        let response = self
            .session
            .send(|client, headers| Ok(client.post(&url).headers(headers).multipart(event.form()?)))
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Notify(format!("backend returned {}", status)));
        }
        Ok(())
    }
}
