//! Configuration management
//!
//! Built-in defaults, then an optional TOML file, then environment
//! variables. Each later layer overrides the earlier ones field by field.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use vigil_backend::{BackendConfig, Credentials};
use vigil_detect::DetectorConfig;
use vigil_media::{CaptureConfig, ResolverConfig};

use crate::scanner::ScanSettings;

/// Upper bound for any scan wait, one day
const MAX_WAIT_SECS: f64 = 86_400.0;

/// Full service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendSection,

    #[serde(default)]
    pub media: MediaSection,

    #[serde(default)]
    pub detector: DetectorSection,

    #[serde(default)]
    pub scan: ScanSection,

    #[serde(default)]
    pub debug: DebugSection,
}

/// Device-management backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

/// Media server and stream transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSection {
    /// HTTP API base URL
    pub base_url: String,
    pub secret: String,
    /// Application namespace holding camera streams
    pub app: String,
    pub rtsp_host: String,
    pub rtsp_port: u16,
    /// Media listing request timeout in seconds
    pub timeout_secs: u64,
    /// Connect-and-read deadline for one frame, in seconds
    pub capture_timeout_secs: u64,
    /// FFmpeg executable used for frame capture
    pub ffmpeg: String,
}

/// Detection model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSection {
    pub model: PathBuf,
    /// Where `download-model` fetches the model from
    pub model_url: Option<String>,
    /// A person must score strictly above this to raise an alarm
    pub confidence_threshold: f32,
    pub use_gpu: bool,
    pub input_size: u32,
    pub num_threads: usize,
}

/// Scan cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    /// Pause after a full pass
    pub interval_secs: f64,
    /// Pause after a discovery that found no channels
    pub idle_interval_secs: f64,
    /// Pause after an unexpected failure of the loop itself
    pub error_backoff_secs: f64,
    /// Minimum spacing of alarms per channel
    pub cooldown_secs: f64,
}

/// Debug aids
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSection {
    /// Alarm frames are also written here when set
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            username: "admin".to_string(),
            password: "admin123".to_string(),
            timeout_secs: 5,
        }
    }
}

impl Default for MediaSection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:80".to_string(),
            secret: String::new(),
            app: "rtp".to_string(),
            rtsp_host: "127.0.0.1".to_string(),
            rtsp_port: 554,
            timeout_secs: 5,
            capture_timeout_secs: 6,
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            model: PathBuf::from("yolov8n.onnx"),
            model_url: None,
            confidence_threshold: 0.5,
            use_gpu: true,
            input_size: 640,
            num_threads: 4,
        }
    }
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            interval_secs: 2.0,
            idle_interval_secs: 10.0,
            error_backoff_secs: 5.0,
            cooldown_secs: 5.0,
        }
    }
}

impl Config {
    /// Load configuration: defaults, optional TOML file, process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&content).context("Failed to parse config TOML")
    }

    /// Apply environment overrides read through `lookup`
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        env.string("JAVA_API_HOST", &mut self.backend.base_url);
        env.string("API_USERNAME", &mut self.backend.username);
        env.string("API_PASSWORD", &mut self.backend.password);

        env.string("ZLM_HOST", &mut self.media.base_url);
        env.string("ZLM_SECRET", &mut self.media.secret);
        env.string("MEDIA_APP", &mut self.media.app);
        env.string("RTSP_HOST", &mut self.media.rtsp_host);
        env.parse("RTSP_HOST_PORT", &mut self.media.rtsp_port)?;
        env.parse("CAPTURE_TIMEOUT", &mut self.media.capture_timeout_secs)?;

        let mut request_timeout = None;
        env.parse_opt("REQUEST_TIMEOUT", &mut request_timeout)?;
        if let Some(secs) = request_timeout {
            self.backend.timeout_secs = secs;
            self.media.timeout_secs = secs;
        }

        if let Some(model) = (env.lookup)("YOLO_MODEL") {
            self.detector.model = PathBuf::from(model);
        }
        if let Some(url) = (env.lookup)("YOLO_MODEL_URL") {
            self.detector.model_url = Some(url);
        }
        env.parse("CONFIDENCE_THRESHOLD", &mut self.detector.confidence_threshold)?;

        env.parse("CHECK_INTERVAL", &mut self.scan.interval_secs)?;
        env.parse("IDLE_INTERVAL", &mut self.scan.idle_interval_secs)?;
        env.parse("ERROR_BACKOFF", &mut self.scan.error_backoff_secs)?;
        env.parse("ALARM_COOLDOWN", &mut self.scan.cooldown_secs)?;

        if let Some(dir) = (env.lookup)("SNAPSHOT_DIR") {
            self.debug.snapshot_dir = Some(PathBuf::from(dir));
        }

        Ok(self)
    }

    /// Reject values the scanner cannot run with
    pub fn validate(&self) -> Result<()> {
        let threshold = self.detector.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            bail!("confidence threshold must be within [0, 1], got {}", threshold);
        }

        for (name, secs) in [
            ("scan.interval_secs", self.scan.interval_secs),
            ("scan.idle_interval_secs", self.scan.idle_interval_secs),
            ("scan.error_backoff_secs", self.scan.error_backoff_secs),
        ] {
            if !(secs.is_finite() && secs > 0.0) {
                bail!("{} must be a positive number of seconds, got {}", name, secs);
            }
        }

        let cooldown = self.scan.cooldown_secs;
        if !(cooldown.is_finite() && cooldown >= 0.0) {
            bail!("scan.cooldown_secs must not be negative, got {}", cooldown);
        }

        for (name, secs) in [
            ("scan.interval_secs", self.scan.interval_secs),
            ("scan.idle_interval_secs", self.scan.idle_interval_secs),
            ("scan.error_backoff_secs", self.scan.error_backoff_secs),
            ("scan.cooldown_secs", cooldown),
        ] {
            if secs > MAX_WAIT_SECS {
                bail!(
                    "{} must be at most {} seconds, got {}",
                    name,
                    MAX_WAIT_SECS,
                    secs
                );
            }
        }

        if self.backend.timeout_secs == 0
            || self.media.timeout_secs == 0
            || self.media.capture_timeout_secs == 0
        {
            bail!("timeouts must be at least one second");
        }

        if self.detector.input_size == 0 {
            bail!("detector.input_size must be positive");
        }

        Ok(())
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            base_url: self.backend.base_url.clone(),
            credentials: Credentials {
                username: self.backend.username.clone(),
                password: self.backend.password.clone(),
            },
            timeout: Duration::from_secs(self.backend.timeout_secs),
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            base_url: self.media.base_url.clone(),
            secret: self.media.secret.clone(),
            app: self.media.app.clone(),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            rtsp_host: self.media.rtsp_host.clone(),
            rtsp_port: self.media.rtsp_port,
            app: self.media.app.clone(),
            timeout: Duration::from_secs(self.media.capture_timeout_secs),
            ffmpeg: self.media.ffmpeg.clone(),
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            model_path: self.detector.model.clone(),
            input_size: self.detector.input_size,
            use_gpu: self.detector.use_gpu,
            num_threads: self.detector.num_threads,
            ..DetectorConfig::default()
        }
    }

    /// Scanner settings. Call after [`Config::validate`].
    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            interval: Duration::from_secs_f64(self.scan.interval_secs),
            idle_interval: Duration::from_secs_f64(self.scan.idle_interval_secs),
            error_backoff: Duration::from_secs_f64(self.scan.error_backoff_secs),
            cooldown: Duration::from_secs_f64(self.scan.cooldown_secs),
            confidence_threshold: self.detector.confidence_threshold,
            snapshot_dir: self.debug.snapshot_dir.clone(),
        }
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str, target: &mut String) {
        if let Some(value) = (self.lookup)(name) {
            *target = value;
        }
    }

    fn parse<T: FromStr>(&self, name: &str, target: &mut T) -> Result<()> {
        if let Some(value) = (self.lookup)(name) {
            *target = value
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid value for {}: {:?}", name, value))?;
        }
        Ok(())
    }

    fn parse_opt<T: FromStr>(&self, name: &str, target: &mut Option<T>) -> Result<()> {
        if let Some(value) = (self.lookup)(name) {
            *target = Some(
                value
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid value for {}: {:?}", name, value))?,
            );
        }
        Ok(())
    }
}
