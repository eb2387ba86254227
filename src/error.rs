// Error types for the cache check.
// Covers ARM API failures, long-running operation failures, and authorization errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: missing or rejected bearer token")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("ARM API error (HTTP {status}) {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Long-running operation ended {status}: {code}: {message}")]
    OperationFailed {
        status: String,
        code: String,
        message: String,
    },

    #[error("Deadline of {0}s exceeded")]
    DeadlineExceeded(u64),

    #[error("Authorization error: {0}")]
    Auth(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CheckError>;
