//! Recognizer Error Types
//!
//! Centralized error handling for the engine, channels and decoders.

use thiserror::Error;

/// Central error type for the recognizer engine
#[derive(Error, Debug)]
pub enum RecogError {
    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Grammar error: {0}")]
    Grammar(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Task queue is closed")]
    QueueClosed,

    #[error("Unknown channel: {0}")]
    UnknownChannel(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Message sink error: {0}")]
    Sink(String),

    #[error("Lock poisoned: {0}")]
    Lock(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for recognizer operations
pub type RecogResult<T> = Result<T, RecogError>;

/// Helper to convert Mutex poison errors
impl<T> From<std::sync::PoisonError<T>> for RecogError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        RecogError::Lock(err.to_string())
    }
}
