//! vigil-backend - Device-management backend client for Vigil
//!
//! Bearer-token session handling, channel discovery across online devices,
//! and multipart alarm submission.

mod alarm;
mod directory;
mod error;
mod session;
mod types;

#[cfg(test)]
mod testing;

pub use alarm::{encode_jpeg, AlarmEvent, AlarmNotifier};
pub use directory::ChannelDirectory;
pub use error::{BackendError, Result};
pub use session::{Credentials, SessionManager};
pub use types::{Channel, Device, DeviceChannel, Envelope};

use std::sync::Arc;
use std::time::Duration;

/// Connection settings for the backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub credentials: Credentials,
    /// Bound on every backend request
    pub timeout: Duration,
}

/// Backend components sharing one session
pub struct Backend {
    pub session: Arc<SessionManager>,
    pub directory: ChannelDirectory,
    pub notifier: AlarmNotifier,
}

impl Backend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        let session = Arc::new(SessionManager::new(
            client,
            config.base_url,
            config.credentials,
        ));

        Ok(Self {
            directory: ChannelDirectory::new(session.clone()),
            notifier: AlarmNotifier::new(session.clone()),
            session,
        })
    }
}
