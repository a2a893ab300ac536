//! Channel to stream-name resolution against the media server
//!
//! Channel identifiers and media stream names are assigned independently.
//! The mapping is a best-effort substring match over the active-media
//! listing. The first entry in the configured application whose stream name
//! contains the channel identifier wins; with colliding identifiers this can
//! pick the wrong stream. Anything else falls back to the channel identifier
//! itself.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{MediaError, Result};

/// One entry of `GET /index/api/getMediaList`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEntry {
    pub app: String,
    pub stream: String,
    /// Current throughput in bytes per second
    #[serde(default)]
    pub bytes_speed: i64,
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaListResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Vec<MediaEntry>>,
}

/// How a stream name was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    /// Found in the active-media listing
    Matched { bytes_speed: i64 },
    /// No match, or the listing failed; the channel id is used verbatim
    Fallback,
}

/// Result of resolving one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub name: String,
    pub source: StreamSource,
}

impl ResolvedStream {
    pub fn fallback(channel_id: &str) -> Self {
        Self {
            name: channel_id.to_string(),
            source: StreamSource::Fallback,
        }
    }

    /// Matched, but the media server reports no data flowing
    pub fn is_stalled(&self) -> bool {
        matches!(self.source, StreamSource::Matched { bytes_speed } if bytes_speed == 0)
    }
}

/// Media server settings used by the resolver
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Media server HTTP base URL, e.g. `http://127.0.0.1:80`
    pub base_url: String,
    /// Shared API secret
    pub secret: String,
    /// Application namespace that camera streams live in
    pub app: String,
}

/// Resolves channel identifiers to active stream names
pub struct StreamResolver {
    client: Client,
    config: ResolverConfig,
}

impl StreamResolver {
    pub fn new(client: Client, mut config: ResolverConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self { client, config }
    }

    /// Resolve a channel to its stream name. Never fails.
    pub async fn resolve(&self, channel_id: &str) -> ResolvedStream {
        let entries = match self.list_media().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    channel_id = %channel_id,
                    "media listing unavailable, using channel id as stream name: {}", e
                );
                return ResolvedStream::fallback(channel_id);
            }
        };

        match match_stream(&entries, &self.config.app, channel_id) {
            Some(entry) => {
                let resolved = ResolvedStream {
                    name: entry.stream.clone(),
                    source: StreamSource::Matched {
                        bytes_speed: entry.bytes_speed,
                    },
                };
                if resolved.is_stalled() {
                    warn!(
                        channel_id = %channel_id,
                        stream = %resolved.name,
                        "matched stream reports zero throughput, frame may be stale or blank"
                    );
                } else {
                    debug!("channel {} resolved to stream {}", channel_id, resolved.name);
                }
                resolved
            }
            None => {
                warn!(
                    channel_id = %channel_id,
                    "no active stream in app '{}' matches, using channel id", self.config.app
                );
                ResolvedStream::fallback(channel_id)
            }
        }
    }

    /// Fetch the active-media listing
    pub async fn list_media(&self) -> Result<Vec<MediaEntry>> {
        let url = format!("{}/index/api/getMediaList", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("secret", self.config.secret.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Resolution(format!("getMediaList returned {}", status)));
        }

        let body: MediaListResponse = response
            .json()
            .await
            .map_err(|e| MediaError::Resolution(format!("malformed media list: {}", e)))?;

        if body.code != 0 {
            return Err(MediaError::Resolution(format!(
                "getMediaList code {}: {}",
                body.code,
                body.msg.unwrap_or_default()
            )));
        }

        // An empty server answers without `data`
        Ok(body.data.unwrap_or_default())
    }
}

/// First entry in `app` whose stream name contains `channel_id`
pub fn match_stream<'a>(
    entries: &'a [MediaEntry],
    app: &str,
    channel_id: &str,
) -> Option<&'a MediaEntry> {
    if channel_id.is_empty() {
        return None;
    }
    entries
        .iter()
        .filter(|entry| entry.app == app)
        .find(|entry| entry.stream.contains(channel_id))
}
