//! Channel discovery across online devices

use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{BackendError, Result};
use crate::session::SessionManager;
use crate::types::{Channel, Device, DeviceChannel, Envelope};

/// Lists the channels of every online device
pub struct ChannelDirectory {
    session: Arc<SessionManager>,
}

impl ChannelDirectory {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    /// Discover all live channels.
    ///
    /// Never fails: an unreachable backend, a rejected login or a malformed
    /// device list all yield an empty list. A failing channel listing for
    /// one device only drops that device.
    pub async fn list_active_channels(&self) -> Vec<Channel> {
        let devices = match self.fetch_devices().await {
            Ok(devices) => devices,
            Err(BackendError::Auth(msg)) => {
                warn!("no channels this cycle, backend authorization failed: {}", msg);
                return Vec::new();
            }
            Err(e) => {
                warn!("failed to fetch devices: {}", e);
                return Vec::new();
            }
        };

        let mut channels = Vec::new();
        for device in devices.iter().filter(|d| d.online) {
            match self.fetch_channels(device.id).await {
                Ok(device_channels) => {
                    debug!(
                        "device {} (id {}) exposes {} channel(s)",
                        device.device_id,
                        device.id,
                        device_channels.len()
                    );
                    channels.extend(
                        device_channels
                            .into_iter()
                            .map(|ch| Channel::new(device.device_id.clone(), ch.channel_id)),
                    );
                }
                Err(e) => {
                    warn!(
                        device_id = %device.device_id,
                        "failed to fetch channels, skipping device: {}", e
                    );
                }
            }
        }

        let online = devices.iter().filter(|d| d.online).count();
        info!(
            "discovered {} channel(s) on {}/{} online device(s)",
            channels.len(),
            online,
            devices.len()
        );
        channels
    }

    /// `GET /api/devices`
    pub async fn fetch_devices(&self) -> Result<Vec<Device>> {
        self.get_list("/api/devices").await
    }

    /// `GET /api/devices/{internal_id}/channels`
    pub async fn fetch_channels(&self, internal_id: i64) -> Result<Vec<DeviceChannel>> {
        self.get_list(&format!("/api/devices/{}/channels", internal_id))
            .await
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let url = self.session.url(path);
        let response = self
            .session
            .send(|client, headers| Ok(client.get(&url).headers(headers)))
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Discovery(format!("{} returned {}", path, status)));
        }

        let body = response.bytes().await?;
        let envelope: Envelope<T> = serde_json::from_slice(&body)
            .map_err(|e| BackendError::Discovery(format!("malformed response from {}: {}", path, e)))?;
        Ok(envelope.into_items())
    }
}
