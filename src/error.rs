use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by downloaders, sessions and combined tasks.
///
/// The type is `Clone` so the same failure can be handed to a callback and
/// used to resolve the handle; shared causes sit behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("downloader has been shut down")]
    Rejected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection timeout")]
    Timeout,

    #[error("HTTP {status}: {reason}")]
    HttpStatus { status: u16, reason: String },

    #[error("session error: {0}")]
    Session(String),

    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    #[error("cache store error: {0}")]
    Cache(String),

    #[error("download cancelled")]
    Cancelled,

    #[error("combined task interrupted")]
    Interrupted,

    #[error("download terminated without a result")]
    Abandoned,
}

impl DownloadError {
    /// Whether another attempt with a fresh session may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DownloadError::Transport(_)
                | DownloadError::Timeout
                | DownloadError::HttpStatus { .. }
                | DownloadError::Session(_)
                | DownloadError::Io(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }

    pub fn session(message: impl Into<String>) -> Self {
        DownloadError::Session(message.into())
    }
}

impl From<io::Error> for DownloadError {
    fn from(e: io::Error) -> Self {
        DownloadError::Io(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
