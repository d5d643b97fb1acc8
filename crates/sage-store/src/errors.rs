//! Store error type.

use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool exhausted or broken.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A JSON column failed to serialize or deserialize.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// No user document with the given uid.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// No conversation document with the given id.
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
}

/// Store result alias.
pub type Result<T> = std::result::Result<T, StoreError>;
