//! Vigil - periodic person detection over surveillance channels

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use vigil_backend::Backend;
use vigil_core::colored_logger::{init_component_logger, Component};
use vigil_core::config::Config;
use vigil_core::pipeline::Pipeline;
use vigil_core::scanner::{ChannelOutcome, ScanReport, Scanner};
use vigil_detect::{Detector, ModelDownloader, DEFAULT_MODEL_URL};
use vigil_media::{FrameAcquirer, StreamResolver, StreamSource};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Scan camera channels for people and report alarms")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan continuously until interrupted
    Run,

    /// Run a single discovery and scanning pass
    Once,

    /// List active channels and their resolved streams
    Channels,

    /// Check dependencies (FFmpeg, model, backend login)
    Check,

    /// Download the detection model
    DownloadModel {
        /// Re-download even if the model exists
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let component = match cli.command {
        Commands::Run | Commands::Once => Component::Scan,
        Commands::DownloadModel { .. } => Component::Model,
        Commands::Channels | Commands::Check => Component::Main,
    };
    init_component_logger(component, cli.verbose)?;

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => cmd_run(config)?,
        Commands::Once => cmd_once(config)?,
        Commands::Channels => cmd_channels(config)?,
        Commands::Check => cmd_check(config)?,
        Commands::DownloadModel { force } => cmd_download_model(config, force)?,
    }

    Ok(())
}

#[tokio::main]
async fn cmd_run(config: Config) -> Result<()> {
    info!("starting vigil scanner");

    let mut scanner = build_scanner(&config).await?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    scanner.run(&shutdown).await;
    Ok(())
}

#[tokio::main]
async fn cmd_once(config: Config) -> Result<()> {
    let mut scanner = build_scanner(&config).await?;
    let report = scanner.run_once().await;
    print_report(&report);
    Ok(())
}

#[tokio::main]
async fn cmd_channels(config: Config) -> Result<()> {
    let backend = Backend::new(config.backend_config())?;
    let resolver = StreamResolver::new(media_client(&config)?, config.resolver_config());
    let acquirer = FrameAcquirer::new(config.capture_config());

    let channels = backend.directory.list_active_channels().await;
    if channels.is_empty() {
        println!("no active channels");
        return Ok(());
    }

    println!("found {} channel(s):\n", channels.len());
    for channel in &channels {
        let stream = resolver.resolve(&channel.channel_id).await;
        let note = if stream.is_stalled() {
            " (no data flowing)"
        } else if stream.source == StreamSource::Fallback {
            " (fallback)"
        } else {
            ""
        };
        println!(
            "  {}  ->  {}{}",
            channel,
            acquirer.stream_url(&stream.name),
            note
        );
    }

    Ok(())
}

#[tokio::main]
async fn cmd_check(config: Config) -> Result<()> {
    println!("checking dependencies...\n");

    let ffmpeg_ok = vigil_media::check_ffmpeg(&config.media.ffmpeg);
    println!("  ffmpeg:  {}", if ffmpeg_ok { "OK" } else { "NOT FOUND" });

    let model_ok = config.detector.model.is_file();
    println!(
        "  model:   {} ({})",
        if model_ok { "OK" } else { "MISSING" },
        config.detector.model.display()
    );

    let backend = Backend::new(config.backend_config())?;
    let login = backend.session.ensure_authorized().await;
    match &login {
        Ok(_) => println!("  backend: OK ({})", config.backend.base_url),
        Err(e) => println!("  backend: FAILED ({})", e),
    }

    let resolver = StreamResolver::new(media_client(&config)?, config.resolver_config());
    let media = resolver.list_media().await;
    match &media {
        Ok(entries) => println!("  media:   OK ({} active stream(s))", entries.len()),
        Err(e) => println!("  media:   FAILED ({})", e),
    }

    println!();

    if !ffmpeg_ok {
        println!("WARNING: FFmpeg is required for frame capture.");
        println!("Please install FFmpeg and ensure it's in your PATH.");
    }
    if !model_ok {
        println!("Run 'vigil download-model' to fetch the detection model.");
    }
    if ffmpeg_ok && model_ok && login.is_ok() && media.is_ok() {
        println!("all checks passed!");
    }

    Ok(())
}

#[tokio::main]
async fn cmd_download_model(config: Config, force: bool) -> Result<()> {
    let url = config
        .detector
        .model_url
        .clone()
        .unwrap_or_else(|| DEFAULT_MODEL_URL.to_string());
    ModelDownloader::new(url, config.detector.model.clone())
        .download(force)
        .await
}

/// Wire real components into a scanner. Fails when the model cannot load.
async fn build_scanner(config: &Config) -> Result<Scanner> {
    if !vigil_media::check_ffmpeg(&config.media.ffmpeg) {
        error!("{} not found - please install FFmpeg", config.media.ffmpeg);
        return Err(anyhow::anyhow!("FFmpeg not found"));
    }

    let detector = load_detector(config).await?;

    let Backend {
        directory,
        notifier,
        ..
    } = Backend::new(config.backend_config())?;
    let resolver = StreamResolver::new(media_client(config)?, config.resolver_config());

    let pipeline = Pipeline {
        channels: Arc::new(directory),
        streams: Arc::new(resolver),
        frames: Arc::new(FrameAcquirer::new(config.capture_config())),
        detector: Arc::new(detector),
        alarms: Arc::new(notifier),
    };

    if let Some(dir) = &config.debug.snapshot_dir {
        info!("alarm frames will be copied to {:?}", dir);
    }

    Ok(Scanner::new(pipeline, config.scan_settings()))
}

/// Load the model once, fetching it first when a source is configured
async fn load_detector(config: &Config) -> Result<Arc<Detector>> {
    let model_path = &config.detector.model;

    if !model_path.is_file() {
        match &config.detector.model_url {
            Some(url) => {
                warn!("model missing at {:?}, downloading", model_path);
                ModelDownloader::new(url.clone(), model_path.clone())
                    .download(false)
                    .await?;
            }
            None => warn!("model missing at {:?} and no YOLO_MODEL_URL set", model_path),
        }
    }

    if vigil_detect::configure_onnx_runtime(model_dir(model_path)).is_none() {
        vigil_detect::configure_onnx_runtime(&vigil_detect::default_model_dir());
    }

    let detector_config = config.detector_config();
    let detector = tokio::task::spawn_blocking(move || Detector::new(detector_config))
        .await
        .context("Model loading task failed")?
        .context("Failed to load detection model")?;

    Ok(Arc::new(detector))
}

fn model_dir(model_path: &Path) -> &Path {
    model_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn media_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.media.timeout_secs))
        .build()
        .context("Failed to build media HTTP client")
}

fn print_report(report: &ScanReport) {
    if report.channels.is_empty() {
        println!("no active channels");
        return;
    }

    println!("checked {} channel(s):\n", report.channels.len());
    for entry in &report.channels {
        let stream = entry
            .stream
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or("-");
        let outcome = match &entry.outcome {
            ChannelOutcome::Clear { objects } => format!("clear ({} object(s))", objects),
            ChannelOutcome::Alarmed { delivered: true } => "ALARM sent".to_string(),
            ChannelOutcome::Alarmed { delivered: false } => "ALARM not delivered".to_string(),
            ChannelOutcome::CoolingDown => "cooling down".to_string(),
            ChannelOutcome::NoFrame => "no frame".to_string(),
            ChannelOutcome::Failed { stage, reason } => format!("{:?} failed: {}", stage, reason),
        };
        println!("  {:<44} {:<32} {}", entry.channel.to_string(), stream, outcome);
    }

    println!(
        "\n{} alarm(s), {} failure(s)",
        report.alarms(),
        report.failures()
    );
}
