//! Local copies of alarm frames

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use vigil_backend::AlarmEvent;

/// Write the event's JPEG to `dir`, creating it if needed
pub async fn save_snapshot(dir: &Path, event: &AlarmEvent) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create snapshot directory {:?}", dir))?;

    let path = dir.join(event.snapshot_file_name());
    tokio::fs::write(&path, &event.jpeg)
        .await
        .with_context(|| format!("Failed to write snapshot {:?}", path))?;
    Ok(path)
}
