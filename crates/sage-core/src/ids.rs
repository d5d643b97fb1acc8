//! ID minting helpers.
//!
//! Conversation ids are UUID v7 with a short prefix so they sort by
//! creation time and are recognizable in logs.

use uuid::Uuid;

/// Mint a new conversation id (`conv_<uuidv7>`).
#[must_use]
pub fn new_conversation_id() -> String {
    format!("conv_{}", Uuid::now_v7())
}

/// Current time as an RFC 3339 timestamp string.
#[must_use]
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
