//! Common error types for SpotSync.

use thiserror::Error;

/// Top-level error type for SpotSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote service could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote service answered with a non-success status.
    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// A remote payload could not be decoded into the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Local cache store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization of local data failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The background sync service is not running.
    #[error("Sync service error: {0}")]
    Service(String),
}

impl Error {
    /// Whether retrying the same request may succeed.
    ///
    /// Transport failures, rate limiting and server-side errors are
    /// transient. Client errors and local failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Remote { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether this failure came from talking to the remote service.
    ///
    /// Repositories degrade to the local cache on these; anything else
    /// is a local fault and is propagated.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Remote { .. } | Error::Decode(_) | Error::NotFound(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
