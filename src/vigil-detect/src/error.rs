//! Error types for object detection

use thiserror::Error;

/// Errors that can occur while loading or running the detector
#[derive(Error, Debug)]
pub enum DetectError {
    /// Model file not found
    #[error("model not found at {path}: {message}")]
    ModelNotFound { path: String, message: String },

    /// Model loading failed
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Inference produced an unexpected output
    #[error("inference error: {0}")]
    Inference(String),

    /// ONNX Runtime error
    #[error("ONNX Runtime error: {0}")]
    Ort(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ort::Error> for DetectError {
    fn from(e: ort::Error) -> Self {
        DetectError::Ort(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DetectError>;
