//! Error types for session operations.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session-specific errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// SQLite-specific error
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// redb-specific error
    #[cfg(feature = "redb")]
    #[error("Key-value store error: {0}")]
    Kv(#[from] redb::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// No record exists for the session identifier
    #[error("Session not found")]
    NotFound,

    /// Invalid configuration or constructor argument
    #[error("Validation error: {0}")]
    Validation(String),

    /// The store or manager has already been shut down
    #[error("Session store is closed")]
    Closed,

    /// The GC loop did not acknowledge shutdown within the timeout
    #[error("GC failed to stop in time")]
    ShutdownTimeout,
}

impl SessionError {
    /// Returns `true` for the expected miss case, which callers treat as
    /// "start a fresh session" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SessionError::NotFound)
    }
}
