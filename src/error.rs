//! Error types for filechat.

use thiserror::Error;

/// All errors surfaced by the filechat library.
#[derive(Debug, Error)]
pub enum FilechatError {
    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem failure (cache writes, document reads).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A prompt-cache file could not be decoded.
    #[error("Cache format error: {0}")]
    CacheFormat(String),

    /// The model adapter failed while warming or generating.
    #[error("Model error: {0}")]
    Model(String),

    /// The consumer stopped reading before generation finished.
    #[error("Generation cancelled")]
    Cancelled,

    /// The session actor is no longer running.
    #[error("Chat session is closed")]
    SessionClosed,

    /// Document collection or extraction failed.
    #[error("Document error: {0}")]
    Documents(String),
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, FilechatError>;
