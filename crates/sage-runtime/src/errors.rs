//! Runtime error taxonomy.

use thiserror::Error;

use sage_llm::ProviderError;
use sage_store::StoreError;

/// Errors the turn surface can return to a caller.
///
/// Provider failures mostly never reach here: the orchestrator degrades
/// them to an apologetic reply. Background-phase failures are logged and
/// never surfaced at all.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Bad request shape (invalid index, missing field).
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing user or conversation, or one the caller may not read.
    #[error("not found: {0}")]
    NotFound(String),

    /// The balance cannot cover the turn cost.
    #[error("insufficient credits")]
    InsufficientCredits,

    /// Generation provider failure on a path that cannot degrade.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Synchronous-path store failure.
    #[error("persistence error: {0}")]
    Persistence(#[source] StoreError),
}

impl From<StoreError> for RuntimeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UserNotFound(id) | StoreError::ConversationNotFound(id) => {
                Self::NotFound(id)
            }
            other => Self::Persistence(other),
        }
    }
}

/// Result alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
