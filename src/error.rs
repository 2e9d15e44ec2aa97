//! Top-level error types for Chagbot.

use std::path::PathBuf;
use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),
}

/// Upload cache persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to read upload cache {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("upload cache {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write upload cache {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize upload cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Text-generation backend errors.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered but reported a non-success status.
    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("backend response missing field: {0}")]
    MissingField(&'static str),
}

/// Messaging platform errors.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("adapter is not connected")]
    NotConnected,

    #[error("invalid channel id: {0}")]
    InvalidChannel(String),

    #[error("upload of {file_name} returned no attachment")]
    MissingAttachment { file_name: String },

    #[error("platform session ended before ready: {0}")]
    SessionEnded(String),
}
