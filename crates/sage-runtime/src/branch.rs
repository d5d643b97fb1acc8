//! Branch manager: conversation forking, listing, and read access.
//!
//! Editing an earlier message forks a new conversation sharing a prefix
//! with its parent. Forks at an already-forked point reparent to the
//! original ancestor so the tree never grows fork-of-fork chains.

use std::sync::Arc;

use metrics::counter;
use tracing::{info, instrument, warn};

use sage_core::conversation::{BranchRef, Conversation, ConversationSummary};
use sage_core::messages::{ChatMessage, Role};
use sage_store::DocumentStore;

use crate::errors::{Result, RuntimeError};

/// Conversation tree operations.
#[derive(Clone)]
pub struct BranchManager {
    store: Arc<DocumentStore>,
}

impl BranchManager {
    /// New manager over the given store.
    #[must_use]
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    /// Fork a conversation at `message_index`, replacing that message
    /// with `new_content` as a fresh user message.
    ///
    /// The copied prefix runs through `message_index` inclusive. When
    /// the original is itself a branch forked at this same index, the
    /// new branch's parent is the original's parent.
    #[instrument(skip(self, new_content))]
    pub fn fork(
        &self,
        conversation_id: &str,
        message_index: usize,
        new_content: &str,
    ) -> Result<Conversation> {
        let original = self.store.get_conversation(conversation_id)?;
        if message_index >= original.messages.len() {
            return Err(RuntimeError::Validation(format!(
                "message index {message_index} out of range for {} messages",
                original.messages.len()
            )));
        }

        // Re-editing the fork point of a branch attaches the new branch
        // to the same ancestor instead of chaining forks.
        let parent_id = match (&original.parent_conversation_id, original.branch_from_message_index)
        {
            (Some(parent), Some(idx)) if idx == message_index => parent.clone(),
            _ => original.id.clone(),
        };

        let mut messages: Vec<ChatMessage> = original.messages[..=message_index].to_vec();
        if messages[message_index].role != Role::User {
            warn!(
                conversation_id,
                message_index, "editing a non-user message; replacing with a user message"
            );
        }
        messages[message_index] = ChatMessage::user(new_content);

        let mut branch = Conversation::new(original.owner_uid.clone());
        branch.title = original.title.clone();
        branch.parent_conversation_id = Some(parent_id.clone());
        branch.branch_from_message_index = Some(message_index);
        branch.messages = messages;

        self.store.create_conversation(&branch)?;
        self.store.register_child_branch(
            &parent_id,
            &BranchRef {
                id: branch.id.clone(),
                title: branch.title.clone(),
                branch_from_message_index: message_index,
            },
        )?;

        info!(parent = %parent_id, branch = %branch.id, message_index, "forked conversation");
        counter!("sage_branches_created_total").increment(1);
        Ok(branch)
    }

    /// Top-level conversations for an owner, newest activity first.
    pub fn list(&self, owner_uid: &str) -> Result<Vec<ConversationSummary>> {
        Ok(self.store.list_conversations(owner_uid)?)
    }

    /// Load a conversation plus its immediate children.
    ///
    /// Readable by its owner, or by anyone (including unauthenticated
    /// callers) when the conversation is shared. Unauthorized access
    /// reads the same as a missing conversation.
    pub fn get(
        &self,
        conversation_id: &str,
        caller: Option<&str>,
    ) -> Result<(Conversation, Vec<Conversation>)> {
        let Some(conv) = self.store.try_get_conversation(conversation_id)? else {
            return Err(RuntimeError::NotFound(conversation_id.to_owned()));
        };
        let authorized = conv.shared || caller == Some(conv.owner_uid.as_str());
        if !authorized {
            return Err(RuntimeError::NotFound(conversation_id.to_owned()));
        }
        let children = self.store.conversation_children(conversation_id)?;
        Ok((conv, children))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
