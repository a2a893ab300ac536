//! Model downloader for the detection model
//!
//! Streams a single ONNX file to disk with a progress bar. The file is
//! written under a `.tmp` name and renamed once complete, so an interrupted
//! download never leaves a truncated model at the target path.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Default source for the nano YOLOv8 export
pub const DEFAULT_MODEL_URL: &str =
    "https://huggingface.co/Xenova/yolov8n/resolve/main/onnx/model.onnx";

/// Model downloader
pub struct ModelDownloader {
    url: String,
    model_path: PathBuf,
}

impl ModelDownloader {
    /// Create a downloader fetching `url` into `model_path`
    pub fn new(url: impl Into<String>, model_path: PathBuf) -> Self {
        Self {
            url: url.into(),
            model_path,
        }
    }

    /// Check if the model file is present
    pub fn is_complete(&self) -> bool {
        self.model_path.is_file()
    }

    /// Download the model. Skips an existing file unless `force` is set.
    pub async fn download(&self, force: bool) -> Result<()> {
        if self.is_complete() && !force {
            info!("{:?} already exists, skipping", self.model_path);
            return Ok(());
        }

        if let Some(parent) = self.model_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create model directory")?;
        }

        info!("Downloading detection model to {:?}", self.model_path);
        let temp_path = self.model_path.with_extension("tmp");
        let downloaded = match self.fetch_to(&temp_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove partial download {:?}: {}", temp_path, cleanup);
                    }
                }
                return Err(e);
            }
        };

        tokio::fs::rename(&temp_path, &self.model_path)
            .await
            .context("Failed to move downloaded model into place")?;
        info!(
            "Download complete! {} saved to {:?}",
            format_bytes(downloaded),
            self.model_path
        );
        Ok(())
    }

    /// Stream the model into `temp_path`, returning the byte count
    async fn fetch_to(&self, temp_path: &Path) -> Result<u64> {
        debug!("Downloading from {}", self.url);

        let response = reqwest::get(&self.url)
            .await
            .context("Failed to start download")?
            .error_for_status()
            .context("Model server refused the download")?;

        let pb = ProgressBar::new(response.content_length().unwrap_or(0));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
                .context("Invalid progress bar template")?
                .progress_chars("#>-"),
        );

        let mut file = File::create(temp_path)
            .await
            .with_context(|| format!("Failed to create {:?}", temp_path))?;

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    pb.abandon_with_message("interrupted");
                    return Err(e).context("Download interrupted");
                }
            };
            file.write_all(&chunk)
                .await
                .context("Error writing model file")?;
            downloaded += chunk.len() as u64;
            pb.set_position(downloaded);
        }
        file.flush().await.context("Failed to flush model file")?;

        pb.finish_with_message("done");
        Ok(downloaded)
    }
}

/// Format bytes as human-readable string
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
