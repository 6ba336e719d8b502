//! Error types for dockyard
//!
//! Every fallible call in the workspace returns this error. Task-level
//! failures (a command exiting non-zero) are not errors: they are recorded in
//! the exec result instead.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// dockyard error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Admission / lookup
    // ========================================================================
    #[error("Resources exhausted: requested {requested}, available {available}")]
    ResourceExhausted { requested: String, available: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    // ========================================================================
    // Durable state
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // Container runtime
    // ========================================================================
    #[error("Runtime error: {0}")]
    Runtime(String),

    // ========================================================================
    // Caller-side interruption
    // ========================================================================
    #[error("context canceled: {0}")]
    Canceled(String),

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    // ========================================================================
    // General
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors raised by the caller's own cancellation or deadline rather than
    /// by the executor.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled(_) | Error::DeadlineExceeded)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Admission error helper
    pub fn resource_exhausted(requested: impl ToString, available: impl ToString) -> Self {
        Error::ResourceExhausted {
            requested: requested.to_string(),
            available: available.to_string(),
        }
    }

    /// Storage error helper that keeps the offending path in the message
    pub fn storage(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Error::Storage(format!("{}: {}", path.display(), err))
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::DeadlineExceeded
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
