//! Error types for conntrace
//!
//! Centralized error handling using thiserror. Per-attempt network errors live in
//! [`crate::transport::TransportError`] and never surface here.

use thiserror::Error;

/// Errors that abort a run or reject a request before it is sent
#[derive(Debug, Error)]
pub enum ConntraceError {
    /// Configuration could not be used
    #[error("Config error: {0}")]
    Config(String),

    /// The request template could not be turned into a request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Artifact persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for conntrace operations
pub type Result<T> = std::result::Result<T, ConntraceError>;
