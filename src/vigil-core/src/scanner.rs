//! Scan loop
//!
//! Two states. `Discovering` asks the backend for live channels; an empty
//! answer waits the idle interval and discovers again. `Scanning` checks
//! every discovered channel once, in order, then waits the scan interval
//! and goes back to discovery.
//!
//! A channel check never fails the pass: each one ends in a
//! [`ChannelOutcome`], including a panic inside the check, which is
//! reported as [`FailureStage::Unexpected`]. A panic escaping a tick
//! elsewhere is caught, logged, and followed by the error backoff before
//! discovery restarts.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use vigil_backend::{AlarmEvent, Channel};
use vigil_detect::person_present;
use vigil_media::ResolvedStream;

use crate::cooldown::Cooldown;
use crate::pipeline::Pipeline;
use crate::snapshot::save_snapshot;

/// Granularity of interruptible sleeps
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Timing and thresholds for the scan loop
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub interval: Duration,
    pub idle_interval: Duration,
    pub error_backoff: Duration,
    pub cooldown: Duration,
    pub confidence_threshold: f32,
    pub snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    Discovering,
    Scanning(Vec<Channel>),
}

/// Step of a channel check that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Capture,
    Detection,
    Encoding,
    /// Panicked somewhere in the check
    Unexpected,
}

/// How one channel check ended
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOutcome {
    /// Frame checked, no person above the threshold
    Clear { objects: usize },
    /// Person found and an alarm attempted
    Alarmed { delivered: bool },
    /// Skipped, an alarm for this channel is still recent
    CoolingDown,
    /// Stream produced no frame
    NoFrame,
    Failed { stage: FailureStage, reason: String },
}

#[derive(Debug, Clone)]
pub struct ChannelReport {
    pub channel: Channel,
    /// `None` when the check was skipped before resolution
    pub stream: Option<ResolvedStream>,
    pub outcome: ChannelOutcome,
}

/// Outcomes of one scanning pass, in channel order
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub channels: Vec<ChannelReport>,
}

impl ScanReport {
    pub fn alarms(&self) -> usize {
        self.channels
            .iter()
            .filter(|r| matches!(r.outcome, ChannelOutcome::Alarmed { .. }))
            .count()
    }

    pub fn failures(&self) -> usize {
        self.channels
            .iter()
            .filter(|r| matches!(r.outcome, ChannelOutcome::Failed { .. }))
            .count()
    }
}

/// Running counters since start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub passes: u64,
    pub empty_discoveries: u64,
    pub channels_checked: u64,
    pub alarms_sent: u64,
    pub alarms_failed: u64,
    pub cooling_down: u64,
    pub no_frame: u64,
    pub failures: u64,
    pub loop_errors: u64,
}

impl ScanStats {
    fn record(&mut self, report: &ScanReport) {
        self.passes += 1;
        for entry in &report.channels {
            self.channels_checked += 1;
            match entry.outcome {
                ChannelOutcome::Clear { .. } => {}
                ChannelOutcome::Alarmed { delivered: true } => self.alarms_sent += 1,
                ChannelOutcome::Alarmed { delivered: false } => self.alarms_failed += 1,
                ChannelOutcome::CoolingDown => self.cooling_down += 1,
                ChannelOutcome::NoFrame => self.no_frame += 1,
                ChannelOutcome::Failed { .. } => self.failures += 1,
            }
        }
    }
}

/// Drives discovery and channel checks
pub struct Scanner {
    pipeline: Pipeline,
    settings: ScanSettings,
    cooldown: Cooldown,
    state: ScanState,
    stats: ScanStats,
}

impl Scanner {
    pub fn new(pipeline: Pipeline, settings: ScanSettings) -> Self {
        Self {
            cooldown: Cooldown::new(settings.cooldown),
            pipeline,
            settings,
            state: ScanState::Discovering,
            stats: ScanStats::default(),
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Run until `shutdown` is set
    pub async fn run(&mut self, shutdown: &AtomicBool) {
        info!(
            "scanning every {:.1}s (idle {:.1}s, alarm cooldown {:.1}s, threshold {})",
            self.settings.interval.as_secs_f64(),
            self.settings.idle_interval.as_secs_f64(),
            self.settings.cooldown.as_secs_f64(),
            self.settings.confidence_threshold
        );

        while !shutdown.load(Ordering::SeqCst) {
            let wait = self.step().await;
            if !wait.is_zero() && !sleep_unless_shutdown(wait, shutdown).await {
                break;
            }
        }

        let s = &self.stats;
        info!(
            "scanner stopped after {} pass(es): {} channel check(s), {} alarm(s) sent, {} failed, {} capture/detection failure(s), {} loop error(s)",
            s.passes, s.channels_checked, s.alarms_sent, s.alarms_failed, s.failures + s.no_frame, s.loop_errors
        );
    }

    /// One state transition with panic isolation. Returns the wait before
    /// the next step.
    pub async fn step(&mut self) -> Duration {
        match AssertUnwindSafe(self.tick()).catch_unwind().await {
            Ok(wait) => wait,
            Err(panic) => {
                self.stats.loop_errors += 1;
                self.state = ScanState::Discovering;
                error!(
                    "scan loop failed: {}, restarting discovery in {:.1}s",
                    panic_message(panic.as_ref()),
                    self.settings.error_backoff.as_secs_f64()
                );
                self.settings.error_backoff
            }
        }
    }

    /// One state transition. Returns the wait before the next tick.
    pub async fn tick(&mut self) -> Duration {
        match std::mem::replace(&mut self.state, ScanState::Discovering) {
            ScanState::Discovering => {
                let channels = self.pipeline.channels.list_active_channels().await;
                if channels.is_empty() {
                    self.stats.empty_discoveries += 1;
                    info!(
                        "no active channels, next discovery in {:.1}s",
                        self.settings.idle_interval.as_secs_f64()
                    );
                    return self.settings.idle_interval;
                }
                debug!("discovered {} channel(s), scanning", channels.len());
                self.state = ScanState::Scanning(channels);
                Duration::ZERO
            }
            ScanState::Scanning(channels) => {
                self.scan_pass(&channels).await;
                self.settings.interval
            }
        }
    }

    /// Discover and scan once, regardless of state
    pub async fn run_once(&mut self) -> ScanReport {
        self.state = ScanState::Discovering;
        let channels = self.pipeline.channels.list_active_channels().await;
        if channels.is_empty() {
            self.stats.empty_discoveries += 1;
            info!("no active channels");
            return ScanReport::default();
        }
        self.scan_pass(&channels).await
    }

    /// Check every channel in order
    pub async fn scan_pass(&mut self, channels: &[Channel]) -> ScanReport {
        let start = Instant::now();
        self.cooldown.prune(start);

        let mut report = ScanReport::default();
        for channel in channels {
            let entry = match AssertUnwindSafe(self.check_channel(channel))
                .catch_unwind()
                .await
            {
                Ok(entry) => entry,
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    error!(
                        device_id = %channel.device_id,
                        channel_id = %channel.channel_id,
                        "channel check panicked: {}", reason
                    );
                    ChannelReport {
                        channel: channel.clone(),
                        stream: None,
                        outcome: ChannelOutcome::Failed {
                            stage: FailureStage::Unexpected,
                            reason,
                        },
                    }
                }
            };
            report.channels.push(entry);
        }

        self.stats.record(&report);
        debug!(
            "pass over {} channel(s) in {}ms: {} alarm(s), {} failure(s); totals {:?}",
            report.channels.len(),
            start.elapsed().as_millis(),
            report.alarms(),
            report.failures(),
            self.stats
        );
        report
    }

    /// Resolve, capture, detect and, on a person, alarm for one channel
    pub async fn check_channel(&mut self, channel: &Channel) -> ChannelReport {
        if let Some(left) = self.cooldown.remaining(channel, Instant::now()) {
            debug!("channel {} cooling down for {}ms", channel, left.as_millis());
            return ChannelReport {
                channel: channel.clone(),
                stream: None,
                outcome: ChannelOutcome::CoolingDown,
            };
        }

        let stream = self.pipeline.streams.resolve(&channel.channel_id).await;
        let outcome = self.inspect(channel, &stream.name).await;
        ChannelReport {
            channel: channel.clone(),
            stream: Some(stream),
            outcome,
        }
    }

    async fn inspect(&mut self, channel: &Channel, stream_name: &str) -> ChannelOutcome {
        let frame = match self.pipeline.frames.capture(stream_name).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!(
                    device_id = %channel.device_id,
                    channel_id = %channel.channel_id,
                    stream = %stream_name,
                    "no frame captured, skipping channel"
                );
                return ChannelOutcome::NoFrame;
            }
            Err(e) => {
                warn!(
                    device_id = %channel.device_id,
                    channel_id = %channel.channel_id,
                    stream = %stream_name,
                    "capture failed: {}", e
                );
                return failed(FailureStage::Capture, e);
            }
        };

        let detections = match self.pipeline.detector.detect(&frame).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!(
                    device_id = %channel.device_id,
                    channel_id = %channel.channel_id,
                    "detection failed: {}", e
                );
                return failed(FailureStage::Detection, e);
            }
        };

        if !person_present(&detections, self.settings.confidence_threshold) {
            debug!("channel {}: {} object(s), no person", channel, detections.len());
            return ChannelOutcome::Clear {
                objects: detections.len(),
            };
        }

        let best = detections
            .iter()
            .filter(|d| d.label == vigil_detect::PERSON)
            .map(|d| d.confidence)
            .fold(0.0_f32, f32::max);
        info!(
            device_id = %channel.device_id,
            channel_id = %channel.channel_id,
            "person detected (confidence {:.2})", best
        );

        let event = match AlarmEvent::capture(&channel.device_id, &channel.channel_id, &frame) {
            Ok(event) => event,
            Err(e) => {
                warn!("could not encode alarm frame for {}: {}", channel, e);
                return failed(FailureStage::Encoding, e);
            }
        };

        if let Some(dir) = &self.settings.snapshot_dir {
            match save_snapshot(dir, &event).await {
                Ok(path) => debug!("snapshot written to {:?}", path),
                Err(e) => warn!("failed to write snapshot: {:#}", e),
            }
        }

        let delivered = self.pipeline.alarms.notify(&event).await;
        self.cooldown.record(channel, Instant::now());
        ChannelOutcome::Alarmed { delivered }
    }
}

fn failed(stage: FailureStage, error: impl std::fmt::Display) -> ChannelOutcome {
    ChannelOutcome::Failed {
        stage,
        reason: error.to_string(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Sleep for `duration`, waking early on shutdown. Returns `false` when
/// interrupted.
pub async fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep(SHUTDOWN_POLL.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{AlarmSink, ChannelSource, FrameSource, ObjectDetector, StreamLookup};
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
    use vigil_detect::{BBox, DetectError, Detection};
    use vigil_media::{MediaError, StreamSource};

    const DEVICE: &str = "34020000001110000001";
    const CHANNEL: &str = "34020000001320000001";

    #[derive(Default)]
    struct FakeChannels {
        channels: Mutex<Vec<Channel>>,
        calls: AtomicUsize,
        panic_next: AtomicBool,
    }

    #[async_trait]
    impl ChannelSource for FakeChannels {
        async fn list_active_channels(&self) -> Vec<Channel> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_next.swap(false, Ordering::SeqCst) {
                panic!("directory exploded");
            }
            self.channels.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct FakeStreams {
        streams: HashMap<String, String>,
    }

    #[async_trait]
    impl StreamLookup for FakeStreams {
        async fn resolve(&self, channel_id: &str) -> ResolvedStream {
            match self.streams.get(channel_id) {
                Some(name) => ResolvedStream {
                    name: name.clone(),
                    source: StreamSource::Matched { bytes_speed: 1000 },
                },
                None => ResolvedStream::fallback(channel_id),
            }
        }
    }

    #[derive(Default)]
    struct FakeFrames {
        requested: Mutex<Vec<String>>,
        empty: HashSet<String>,
        broken: HashSet<String>,
        panicking: HashSet<String>,
    }

    #[async_trait]
    impl FrameSource for FakeFrames {
        async fn capture(&self, stream_name: &str) -> Result<Option<RgbImage>, MediaError> {
            self.requested.lock().unwrap().push(stream_name.to_string());
            if self.panicking.contains(stream_name) {
                panic!("decoder crashed on {}", stream_name);
            }
            if self.broken.contains(stream_name) {
                return Err(MediaError::Capture("spawn ffmpeg failed".to_string()));
            }
            if self.empty.contains(stream_name) {
                return Ok(None);
            }
            Ok(Some(RgbImage::from_pixel(32, 24, Rgb([90, 120, 150]))))
        }
    }

    #[derive(Default)]
    struct FakeDetector {
        detections: Vec<Detection>,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ObjectDetector for FakeDetector {
        async fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DetectError::Inference("bad tensor".to_string()));
            }
            Ok(self.detections.clone())
        }
    }

    struct FakeAlarms {
        accept: bool,
        events: Mutex<Vec<AlarmEvent>>,
    }

    impl Default for FakeAlarms {
        fn default() -> Self {
            Self {
                accept: true,
                events: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AlarmSink for FakeAlarms {
        async fn notify(&self, event: &AlarmEvent) -> bool {
            self.events.lock().unwrap().push(event.clone());
            self.accept
        }
    }

    fn detection(label: &'static str, class_id: usize, confidence: f32) -> Detection {
        Detection {
            class_id,
            label,
            confidence,
            bbox: BBox { x1: 1.0, y1: 1.0, x2: 10.0, y2: 20.0 },
        }
    }

    fn settings() -> ScanSettings {
        ScanSettings {
            interval: Duration::from_secs(2),
            idle_interval: Duration::from_secs(10),
            error_backoff: Duration::from_secs(5),
            cooldown: Duration::from_secs(5),
            confidence_threshold: 0.5,
            snapshot_dir: None,
        }
    }

    struct Harness {
        channels: Arc<FakeChannels>,
        frames: Arc<FakeFrames>,
        detector: Arc<FakeDetector>,
        alarms: Arc<FakeAlarms>,
        scanner: Scanner,
    }

    fn harness(
        channels: Vec<Channel>,
        streams: FakeStreams,
        frames: FakeFrames,
        detector: FakeDetector,
        alarms: FakeAlarms,
        settings: ScanSettings,
    ) -> Harness {
        let fake_channels = Arc::new(FakeChannels {
            channels: Mutex::new(channels),
            ..FakeChannels::default()
        });
        let frames = Arc::new(frames);
        let detector = Arc::new(detector);
        let alarms = Arc::new(alarms);

        let pipeline = Pipeline {
            channels: fake_channels.clone(),
            streams: Arc::new(streams),
            frames: frames.clone(),
            detector: detector.clone(),
            alarms: alarms.clone(),
        };

        Harness {
            channels: fake_channels,
            frames,
            detector,
            alarms,
            scanner: Scanner::new(pipeline, settings),
        }
    }

    fn person_scene(detections: Vec<Detection>, alarms: FakeAlarms) -> Harness {
        harness(
            vec![Channel::new(DEVICE, CHANNEL)],
            FakeStreams {
                streams: HashMap::from([(CHANNEL.to_string(), format!("{}_0", CHANNEL))]),
            },
            FakeFrames::default(),
            FakeDetector {
                detections,
                ..FakeDetector::default()
            },
            alarms,
            settings(),
        )
    }

    #[tokio::test]
    async fn test_person_raises_one_alarm() {
        let mut h = person_scene(vec![detection("person", 0, 0.92)], FakeAlarms::default());

        let report = h.scanner.run_once().await;

        assert_eq!(report.channels.len(), 1);
        assert_eq!(report.channels[0].outcome, ChannelOutcome::Alarmed { delivered: true });
        assert_eq!(
            report.channels[0].stream.as_ref().unwrap().name,
            format!("{}_0", CHANNEL)
        );
        assert_eq!(*h.frames.requested.lock().unwrap(), vec![format!("{}_0", CHANNEL)]);

        let events = h.alarms.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].device_id, DEVICE);
        assert_eq!(events[0].channel_id, CHANNEL);
        assert_eq!(&events[0].jpeg[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_second_positive_within_cooldown_is_suppressed() {
        let mut h = person_scene(vec![detection("person", 0, 0.92)], FakeAlarms::default());

        h.scanner.run_once().await;
        let second = h.scanner.run_once().await;

        assert_eq!(second.channels[0].outcome, ChannelOutcome::CoolingDown);
        assert!(second.channels[0].stream.is_none());
        assert_eq!(h.alarms.events.lock().unwrap().len(), 1);
        // the cooling channel is not captured or inspected again
        assert_eq!(h.frames.requested.lock().unwrap().len(), 1);
        assert_eq!(h.detector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_notify_still_cools_down() {
        let mut h = person_scene(
            vec![detection("person", 0, 0.92)],
            FakeAlarms {
                accept: false,
                ..FakeAlarms::default()
            },
        );

        let first = h.scanner.run_once().await;
        let second = h.scanner.run_once().await;

        assert_eq!(first.channels[0].outcome, ChannelOutcome::Alarmed { delivered: false });
        assert_eq!(second.channels[0].outcome, ChannelOutcome::CoolingDown);
        assert_eq!(h.alarms.events.lock().unwrap().len(), 1);
        assert_eq!(h.scanner.stats().alarms_failed, 1);
    }

    #[tokio::test]
    async fn test_zero_cooldown_alarms_every_pass() {
        let mut h = person_scene(vec![detection("person", 0, 0.92)], FakeAlarms::default());
        h.scanner = Scanner::new(
            h.scanner.pipeline.clone(),
            ScanSettings {
                cooldown: Duration::ZERO,
                ..settings()
            },
        );

        h.scanner.run_once().await;
        h.scanner.run_once().await;
        assert_eq!(h.alarms.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_threshold_is_strict_and_person_only() {
        let mut h = person_scene(
            vec![detection("person", 0, 0.5), detection("car", 2, 0.99)],
            FakeAlarms::default(),
        );

        let report = h.scanner.run_once().await;
        assert_eq!(report.channels[0].outcome, ChannelOutcome::Clear { objects: 2 });
        assert!(h.alarms.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_discovery_waits_idle_without_scanning() {
        let mut h = harness(
            vec![],
            FakeStreams::default(),
            FakeFrames::default(),
            FakeDetector::default(),
            FakeAlarms::default(),
            settings(),
        );

        assert_eq!(h.scanner.tick().await, Duration::from_secs(10));
        assert_eq!(*h.scanner.state(), ScanState::Discovering);
        assert_eq!(h.scanner.tick().await, Duration::from_secs(10));

        assert_eq!(h.channels.calls.load(Ordering::SeqCst), 2);
        assert!(h.frames.requested.lock().unwrap().is_empty());
        assert_eq!(h.scanner.stats().empty_discoveries, 2);
        assert_eq!(h.scanner.stats().passes, 0);
    }

    #[tokio::test]
    async fn test_discovery_then_scan_then_discovery() {
        let mut h = person_scene(vec![], FakeAlarms::default());

        assert_eq!(h.scanner.tick().await, Duration::ZERO);
        assert_eq!(
            *h.scanner.state(),
            ScanState::Scanning(vec![Channel::new(DEVICE, CHANNEL)])
        );

        assert_eq!(h.scanner.tick().await, Duration::from_secs(2));
        assert_eq!(*h.scanner.state(), ScanState::Discovering);
        assert_eq!(h.scanner.stats().passes, 1);
        assert_eq!(h.scanner.stats().channels_checked, 1);
    }

    #[tokio::test]
    async fn test_unresolved_channel_captures_raw_id() {
        let mut h = harness(
            vec![Channel::new(DEVICE, CHANNEL)],
            FakeStreams::default(),
            FakeFrames::default(),
            FakeDetector::default(),
            FakeAlarms::default(),
            settings(),
        );

        let report = h.scanner.run_once().await;
        assert_eq!(
            report.channels[0].stream,
            Some(ResolvedStream::fallback(CHANNEL))
        );
        assert_eq!(*h.frames.requested.lock().unwrap(), vec![CHANNEL.to_string()]);
    }

    #[tokio::test]
    async fn test_channel_failures_are_isolated() {
        let mut h = harness(
            vec![
                Channel::new(DEVICE, "broken"),
                Channel::new(DEVICE, "empty"),
                Channel::new(DEVICE, "healthy"),
            ],
            FakeStreams::default(),
            FakeFrames {
                broken: HashSet::from(["broken".to_string()]),
                empty: HashSet::from(["empty".to_string()]),
                ..FakeFrames::default()
            },
            FakeDetector {
                detections: vec![detection("person", 0, 0.8)],
                ..FakeDetector::default()
            },
            FakeAlarms::default(),
            settings(),
        );

        let report = h.scanner.run_once().await;
        let outcomes: Vec<&ChannelOutcome> = report.channels.iter().map(|r| &r.outcome).collect();

        assert!(matches!(
            outcomes[0],
            ChannelOutcome::Failed { stage: FailureStage::Capture, .. }
        ));
        assert_eq!(outcomes[1], &ChannelOutcome::NoFrame);
        assert_eq!(outcomes[2], &ChannelOutcome::Alarmed { delivered: true });

        let events = h.alarms.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel_id, "healthy");
        assert_eq!(report.failures(), 1);
        assert_eq!(report.alarms(), 1);
    }

    #[tokio::test]
    async fn test_detection_failure_skips_channel() {
        let mut h = harness(
            vec![Channel::new(DEVICE, "a"), Channel::new(DEVICE, "b")],
            FakeStreams::default(),
            FakeFrames::default(),
            FakeDetector {
                fail: true,
                ..FakeDetector::default()
            },
            FakeAlarms::default(),
            settings(),
        );

        let report = h.scanner.run_once().await;
        assert_eq!(report.failures(), 2);
        assert!(report.channels.iter().all(|r| matches!(
            r.outcome,
            ChannelOutcome::Failed { stage: FailureStage::Detection, .. }
        )));
        assert!(h.alarms.events.lock().unwrap().is_empty());
        assert_eq!(h.scanner.stats().failures, 2);
    }

    #[tokio::test]
    async fn test_panicking_channel_does_not_end_pass() {
        let mut h = harness(
            vec![Channel::new(DEVICE, "bad"), Channel::new(DEVICE, "good")],
            FakeStreams::default(),
            FakeFrames {
                panicking: HashSet::from(["bad".to_string()]),
                ..FakeFrames::default()
            },
            FakeDetector {
                detections: vec![detection("person", 0, 0.8)],
                ..FakeDetector::default()
            },
            FakeAlarms::default(),
            settings(),
        );

        assert_eq!(h.scanner.step().await, Duration::ZERO);
        assert_eq!(h.scanner.step().await, Duration::from_secs(2));

        assert_eq!(
            *h.frames.requested.lock().unwrap(),
            vec!["bad".to_string(), "good".to_string()]
        );
        let stats = h.scanner.stats();
        assert_eq!(stats.loop_errors, 0);
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.alarms_sent, 1);

        let report = h.scanner.run_once().await;
        match &report.channels[0].outcome {
            ChannelOutcome::Failed { stage, reason } => {
                assert_eq!(*stage, FailureStage::Unexpected);
                assert!(reason.contains("decoder crashed on bad"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(report.channels[1].outcome, ChannelOutcome::CoolingDown);
    }

    #[tokio::test]
    async fn test_loop_panic_backs_off_and_recovers() {
        let mut h = person_scene(vec![], FakeAlarms::default());
        h.channels.panic_next.store(true, Ordering::SeqCst);

        assert_eq!(h.scanner.step().await, Duration::from_secs(5));
        assert_eq!(*h.scanner.state(), ScanState::Discovering);
        assert_eq!(h.scanner.stats().loop_errors, 1);

        assert_eq!(h.scanner.step().await, Duration::ZERO);
        assert!(matches!(h.scanner.state(), ScanState::Scanning(_)));
    }

    #[tokio::test]
    async fn test_alarm_frame_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = person_scene(vec![detection("person", 0, 0.92)], FakeAlarms::default());
        h.scanner = Scanner::new(
            h.scanner.pipeline.clone(),
            ScanSettings {
                snapshot_dir: Some(dir.path().to_path_buf()),
                ..settings()
            },
        );

        h.scanner.run_once().await;

        let event = h.alarms.events.lock().unwrap()[0].clone();
        let written = std::fs::read(dir.path().join(event.snapshot_file_name())).unwrap();
        assert_eq!(written, event.jpeg);
    }

    #[tokio::test]
    async fn test_run_exits_when_shutdown_already_set() {
        let mut h = person_scene(vec![], FakeAlarms::default());
        let shutdown = AtomicBool::new(true);

        h.scanner.run(&shutdown).await;
        assert_eq!(h.channels.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sleep_is_interrupted_by_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let start = Instant::now();
        let completed = sleep_unless_shutdown(Duration::from_secs(30), &shutdown).await;
        assert!(!completed);
        assert!(start.elapsed() < Duration::from_secs(5));

        assert!(sleep_unless_shutdown(Duration::from_millis(10), &AtomicBool::new(false)).await);
    }
}
