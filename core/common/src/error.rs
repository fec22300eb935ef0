//! Common error types for tasksync.

use thiserror::Error;

/// Top-level error type for tasksync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No principal is signed in.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Local record not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote store could not be reached (network, throttling, token expiry, timeout).
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// Remote store refused the request (malformed payload, permission denied).
    #[error("Remote rejected: {0}")]
    RemoteRejected(String),

    /// Remote document does not exist.
    #[error("Remote not found: {0}")]
    RemoteNotFound(String),

    /// Local durability failure.
    #[error("Store error: {0}")]
    Store(String),

    /// A write would break a uniqueness constraint of the store.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same request later is expected to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RemoteUnavailable(_) | Error::Io(_))
    }

    /// Whether the request must change before a retry can succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::RemoteRejected(_) | Error::RemoteNotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
