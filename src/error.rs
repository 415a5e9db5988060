//! Error types for renderd.

use thiserror::Error;

/// Error types for daemon operations.
#[derive(Error, Debug)]
pub enum RenderdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("unknown style: {0}")]
    UnknownStyle(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type alias for daemon operations.
pub type RenderdResult<T> = Result<T, RenderdError>;
