//! Conversation records and branch back-references.
//!
//! Conversations form a tree: editing an earlier message forks a new
//! conversation that shares a message prefix with its parent. A
//! conversation has at most one parent; `children_branches` entries are
//! back-references maintained by the branch manager and may contain
//! duplicates (accepted, not deduplicated).

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_CONVERSATION_TITLE;
use crate::ids::{new_conversation_id, now_rfc3339};
use crate::messages::ChatMessage;

/// Back-reference to a branch forked off a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRef {
    /// Branch conversation id.
    pub id: String,
    /// Branch title at fork time.
    pub title: String,
    /// Message index at which the branch diverges from this conversation.
    pub branch_from_message_index: usize,
}

/// A persisted conversation document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation id (`conv_<uuidv7>`).
    pub id: String,
    /// Owning user id.
    pub owner_uid: String,
    /// Display title.
    pub title: String,
    /// Ordered message transcript.
    pub messages: Vec<ChatMessage>,
    /// ISO 8601 creation time.
    pub created_at: String,
    /// ISO 8601 time of the last persisted change.
    pub last_updated: String,
    /// Starred by the owner.
    pub starred: bool,
    /// Readable by unauthenticated callers.
    pub shared: bool,
    /// Parent conversation if this is a branch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_conversation_id: Option<String>,
    /// Fork point within the parent, if this is a branch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_from_message_index: Option<usize>,
    /// Branches forked off this conversation (duplicates allowed).
    #[serde(default)]
    pub children_branches: Vec<BranchRef>,
}

impl Conversation {
    /// Create a fresh top-level conversation for `owner_uid`.
    #[must_use]
    pub fn new(owner_uid: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_conversation_id(),
            owner_uid: owner_uid.into(),
            title: DEFAULT_CONVERSATION_TITLE.to_owned(),
            messages: Vec::new(),
            created_at: now.clone(),
            last_updated: now,
            starred: false,
            shared: false,
            parent_conversation_id: None,
            branch_from_message_index: None,
            children_branches: Vec::new(),
        }
    }

    /// Whether this conversation was forked off another one.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        self.parent_conversation_id.is_some()
    }
}

/// Listing row for the conversation sidebar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// Conversation id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// ISO 8601 time of the last persisted change.
    pub last_updated: String,
    /// Starred by the owner.
    pub starred: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
