//! vigil-detect - Person detection for Vigil
//!
//! Runs a YOLO model through ONNX Runtime over captured frames.
//! Supports GPU acceleration via CUDA with CPU fallback.

mod download;
mod engine;
mod error;
mod labels;
mod postprocess;

pub use download::{ModelDownloader, DEFAULT_MODEL_URL};
pub use engine::{Detector, DetectorConfig};
pub use error::{DetectError, Result};
pub use labels::{class_name, COCO_CLASSES, PERSON};
pub use postprocess::{
    decode_output, non_max_suppression, person_present, preprocess, BBox, Detection, Letterbox,
};

use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Platform name of the ONNX Runtime shared library
#[cfg(target_os = "windows")]
pub const ORT_LIBRARY_NAME: &str = "onnxruntime.dll";
#[cfg(target_os = "macos")]
pub const ORT_LIBRARY_NAME: &str = "libonnxruntime.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const ORT_LIBRARY_NAME: &str = "libonnxruntime.so";

/// Get the default model directory
pub fn default_model_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Vigil")
        .join("models")
}

/// Point the dynamically loaded ONNX Runtime at a library shipped next to
/// the model, unless `ORT_DYLIB_PATH` is already set.
///
/// Returns the library path when one was configured. Must run before the
/// first session is built.
pub fn configure_onnx_runtime(model_dir: &Path) -> Option<PathBuf> {
    if let Ok(existing) = std::env::var("ORT_DYLIB_PATH") {
        debug!("ORT_DYLIB_PATH already set to {}", existing);
        return None;
    }

    let candidate = model_dir.join(ORT_LIBRARY_NAME);
    if !candidate.is_file() {
        debug!("no bundled ONNX Runtime in {:?}, using system library", model_dir);
        return None;
    }

    info!("using ONNX Runtime at {:?}", candidate);
    std::env::set_var("ORT_DYLIB_PATH", &candidate);
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model_dir() {
        let dir = default_model_dir();
        assert!(dir.ends_with(Path::new("Vigil").join("models")));
    }

    #[test]
    fn test_configure_without_bundled_library() {
        let dir = tempfile::tempdir().unwrap();
        assert!(configure_onnx_runtime(dir.path()).is_none());
    }
}
