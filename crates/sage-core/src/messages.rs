//! Chat message types.

use serde::{Deserialize, Serialize};

use crate::ids::now_rfc3339;

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sent by the end user.
    User,
    /// Produced by the generation provider.
    Assistant,
}

/// One message in a conversation.
///
/// Immutable once appended to a persisted conversation, except for the
/// single message a fork rewrites when constructing its own copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message author.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// ISO 8601 creation time.
    pub timestamp: String,
    /// Optional reaction tag set by the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
}

impl ChatMessage {
    /// New user message stamped with the current time.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: now_rfc3339(),
            reaction: None,
        }
    }

    /// New assistant message stamped with the current time.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: now_rfc3339(),
            reaction: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
