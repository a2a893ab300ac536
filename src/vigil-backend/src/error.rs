//! Backend error types

use thiserror::Error;

/// Errors raised while talking to the device-management backend
#[derive(Error, Debug)]
pub enum BackendError {
    /// Login rejected, unreachable, or still unauthorized after one re-login
    #[error("authorization failed: {0}")]
    Auth(String),

    /// Device or channel listing unusable
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// Alarm submission rejected
    #[error("alarm submission failed: {0}")]
    Notify(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, BackendError>;
