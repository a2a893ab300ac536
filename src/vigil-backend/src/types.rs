//! Wire types for the backend REST surface

use serde::{Deserialize, Serialize};

/// A registered camera or encoder unit as listed by `GET /api/devices`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Internal database key, used to address `/api/devices/{id}/channels`
    pub id: i64,
    /// External protocol identifier, used for stream naming and alarms
    pub device_id: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub name: Option<String>,
}

/// A channel entry as listed by `GET /api/devices/{id}/channels`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceChannel {
    pub channel_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A live channel discovered during one scan cycle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Channel {
    /// External identifier of the parent device
    pub device_id: String,
    pub channel_id: String,
}

impl Channel {
    pub fn new(device_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.device_id, self.channel_id)
    }
}

/// Response envelope used by list endpoints.
///
/// The backend returns either a bare JSON array or an `ApiResult`-style
/// wrapper with the array under `data`. Both collapse into a plain `Vec`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Envelope<T> {
    Bare(Vec<T>),
    Wrapped { data: Vec<T> },
}

impl<T> Envelope<T> {
    pub fn into_items(self) -> Vec<T> {
        match self {
            Envelope::Bare(items) => items,
            Envelope::Wrapped { data } => data,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginData {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_bare_list() {
        let json = r#"[{"channelId": "34020000001320000001"}]"#;
        let env: Envelope<DeviceChannel> = serde_json::from_str(json).unwrap();
        let items = env.into_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].channel_id, "34020000001320000001");
    }

    #[test]
    fn test_envelope_wrapped_list() {
        let json = r#"{"code": 0, "message": "ok", "data": [
            {"id": 7, "deviceId": "34020000001110000001", "online": true, "name": "gate"},
            {"id": 8, "deviceId": "34020000001110000002", "online": false}
        ]}"#;
        let env: Envelope<Device> = serde_json::from_str(json).unwrap();
        let items = env.into_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, 7);
        assert!(items[0].online);
        assert!(!items[1].online);
    }

    #[test]
    fn test_envelope_rejects_null_data() {
        let json = r#"{"code": 500, "message": "boom", "data": null}"#;
        assert!(serde_json::from_str::<Envelope<Device>>(json).is_err());
    }

    #[test]
    fn test_device_online_defaults_to_false() {
        let device: Device = serde_json::from_str(r#"{"id": 1, "deviceId": "a"}"#).unwrap();
        assert!(!device.online);
    }

    #[test]
    fn test_channel_display() {
        assert_eq!(Channel::new("dev", "ch").to_string(), "dev/ch");
    }
}
