//! Error types for the reconciliation engine.
//!
//! Every failure is a `SyncError`. Callers that need to decide whether a
//! failure stops the run, gets retried, or is merely recorded against one item
//! use [`SyncError::class`], which maps each variant into [`ErrorClass`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for shelfsync.
#[derive(Debug, Error)]
pub enum SyncError {
    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Store errors
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Throttled by {store}: {message}")]
    Throttled { store: String, message: String },

    #[error("Transient store error: {message}")]
    Transient { message: String },

    #[error("Store error: {message}")]
    Store { message: String },

    // Execution errors
    #[error("Size mismatch for {path}: expected {expected} bytes, wrote {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("No free name for {target} after {attempts} attempts")]
    NoFreeName { target: String, attempts: u32 },

    #[error("Invalid plan: {message}")]
    InvalidPlan { message: String },

    #[error("Run cancelled")]
    Cancelled,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for shelfsync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure taxonomy used in reports and audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    /// The source vanished since planning. Dropped, not fatal.
    NotFound,
    /// The target already holds the intended end state. Counted as success.
    AlreadySatisfied,
    /// Target name was taken and a suffixed name was used instead.
    NameCollision,
    /// Live state drifted beyond what the plan assumed.
    SizeMismatchUnexpected,
    /// Retryable store or network fault.
    TransientIo,
    /// Configuration or permission problem that stops the run.
    Fatal,
    /// Any other per-item failure.
    ItemFailure,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::NotFound => "NOT_FOUND",
            ErrorClass::AlreadySatisfied => "ALREADY_SATISFIED",
            ErrorClass::NameCollision => "NAME_COLLISION",
            ErrorClass::SizeMismatchUnexpected => "SIZE_MISMATCH_UNEXPECTED",
            ErrorClass::TransientIo => "TRANSIENT_IO",
            ErrorClass::Fatal => "FATAL",
            ErrorClass::ItemFailure => "ITEM_FAILURE",
        };
        f.write_str(s)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Other(format!("Background task failed: {}", err))
    }
}

impl SyncError {
    /// Create an IO error with path context.
    ///
    /// `NotFound` and `PermissionDenied` IO kinds are lifted into their own
    /// variants so they classify correctly.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => SyncError::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                SyncError::PermissionDenied(path.display().to_string())
            }
            _ => SyncError::Io {
                message: err.to_string(),
                path: Some(path),
                source: Some(err),
            },
        }
    }

    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Config {
            message: message.into(),
        }
    }

    /// Map this error into the reporting taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::NotFound(_) => ErrorClass::NotFound,
            SyncError::SizeMismatch { .. } => ErrorClass::SizeMismatchUnexpected,
            SyncError::Timeout(_) | SyncError::Throttled { .. } | SyncError::Transient { .. } => {
                ErrorClass::TransientIo
            }
            SyncError::PermissionDenied(_) | SyncError::Config { .. } => ErrorClass::Fatal,
            SyncError::Io { .. }
            | SyncError::Json { .. }
            | SyncError::Store { .. }
            | SyncError::NoFreeName { .. }
            | SyncError::InvalidPlan { .. }
            | SyncError::Cancelled
            | SyncError::Other(_) => ErrorClass::ItemFailure,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::TransientIo
    }

    /// Check if this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}
