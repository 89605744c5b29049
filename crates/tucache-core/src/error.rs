//! Error types for tucache

use thiserror::Error;

/// tucache error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for tucache
pub type Result<T> = std::result::Result<T, Error>;
