//! Album client error types

use thiserror::Error;

/// Error type shared by every album_core component
#[derive(Error, Debug)]
pub enum AlbumError {
    // ===== Transient (fallback tier or silent drop) =====
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Image decode error: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Not a failure: the caller navigated away =====
    #[error("Request aborted")]
    Aborted,

    // ===== Setup problems =====
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker channel closed: {0}")]
    ChannelClosed(String),
}

impl AlbumError {
    /// Can the component fall back or retry after this error?
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AlbumError::Http(_)
                | AlbumError::Status { .. }
                | AlbumError::Decode(_)
                | AlbumError::Io(_)
                | AlbumError::Json(_)
        )
    }

    /// Aborts are cancellations, never reported as failures
    pub fn is_abort(&self) -> bool {
        matches!(self, AlbumError::Aborted)
    }

    /// Message for the viewer's retry affordance
    pub fn user_message(&self) -> String {
        match self {
            AlbumError::Status { status, .. } => format!("Load failed (HTTP {}), tap to retry", status),
            AlbumError::Decode(_) => "Image could not be decoded, tap to retry".to_string(),
            AlbumError::Http(_) | AlbumError::Io(_) => "Load failed, tap to retry".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<image::ImageError> for AlbumError {
    fn from(e: image::ImageError) -> Self {
        AlbumError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AlbumError>;
