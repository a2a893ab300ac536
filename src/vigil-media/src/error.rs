//! Media error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    /// Active-media listing unusable; `resolve` recovers from this
    #[error("media listing failed: {0}")]
    Resolution(String),

    /// Transport session could not be started or produced garbage
    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error("frame capture timed out after {0}s")]
    Timeout(u64),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, MediaError>;
