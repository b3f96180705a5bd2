//! Error types for `Rallets` core library.

use thiserror::Error;

/// Result type alias using `Rallets` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `Rallets` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A required local record or roster entry does not exist.
    #[error("{0}")]
    NotFound(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
