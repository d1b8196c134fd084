//! Error types for LifeQuery.

use thiserror::Error;

/// Result type alias using LifeQuery's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for LifeQuery operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Settings missing or invalid; the operation is refused
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network hiccup or rate limit; safe to retry
    #[error("Transient error: {0}")]
    Transient(String),

    /// The model endpoint returned a deterministic failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Single-flight rejection; an operation of this kind is already running
    #[error("Operation already running: {0}")]
    Conflict(String),

    /// Operation was cancelled by the caller
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Internal invariant violated (a bug, not an environment problem)
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Authentication/authorization failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        // Connection-level failures are retryable; anything with a status
        // already reached the endpoint and is not.
        if e.is_connect() || e.is_timeout() {
            Error::Transient(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}
