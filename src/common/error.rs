//! Error types for hank

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Namespace Errors ===
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Node already exists: {0}")]
    AlreadyExists(String),

    #[error("Node not empty: {0}")]
    NotEmpty(String),

    #[error("Conflicting version at {path}: expected {expected}, got {actual}")]
    ConflictingVersion {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("Session lost")]
    SessionLost,

    #[error("Interrupted")]
    Interrupted,

    #[error("Malformed value at {path}: {reason}")]
    MalformedValue { path: String, reason: String },

    // === Storage Errors ===
    #[error("Out-of-order write: {0}")]
    OutOfOrderWrite(String),

    // === HTTP Errors ===
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConflictingVersion { .. } | Error::SessionLost
        )
    }

    /// Malformed-value error with no path context yet.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedValue {
            path: String::new(),
            reason: reason.into(),
        }
    }

    /// Attach a node path to a malformed-value error.
    pub fn at_path(self, node_path: &str) -> Self {
        match self {
            Error::MalformedValue { reason, .. } => Error::MalformedValue {
                path: node_path.to_string(),
                reason,
            },
            other => other,
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidParameters(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Internal(e.to_string())
    }
}
