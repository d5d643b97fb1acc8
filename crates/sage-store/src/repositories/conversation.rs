//! Conversation repository — CRUD for the `conversations` table.
//!
//! Messages and branch back-references are JSON columns; list fields the
//! sidebar needs (title, starred, timestamps) are real columns so the
//! owner listing can be served by an index.

use rusqlite::{Connection, OptionalExtension, params};

use sage_core::conversation::{BranchRef, Conversation, ConversationSummary};
use sage_core::messages::ChatMessage;

use crate::errors::Result;

/// Raw row before the JSON columns are decoded.
struct ConversationRow {
    id: String,
    owner_uid: String,
    title: String,
    messages_json: String,
    created_at: String,
    last_updated: String,
    starred: bool,
    shared: bool,
    parent_conversation_id: Option<String>,
    branch_from_message_index: Option<i64>,
    children_json: String,
}

impl ConversationRow {
    fn decode(self) -> Result<Conversation> {
        Ok(Conversation {
            id: self.id,
            owner_uid: self.owner_uid,
            title: self.title,
            messages: serde_json::from_str(&self.messages_json)?,
            created_at: self.created_at,
            last_updated: self.last_updated,
            starred: self.starred,
            shared: self.shared,
            parent_conversation_id: self.parent_conversation_id,
            branch_from_message_index: self.branch_from_message_index.map(|i| i as usize),
            children_branches: serde_json::from_str(&self.children_json)?,
        })
    }
}

/// Conversation repository — stateless, every method takes `&Connection`.
pub struct ConversationRepo;

impl ConversationRepo {
    /// Insert a conversation document.
    pub fn create(conn: &Connection, conv: &Conversation) -> Result<()> {
        let messages = serde_json::to_string(&conv.messages)?;
        let children = serde_json::to_string(&conv.children_branches)?;
        let _ = conn.execute(
            "INSERT INTO conversations
                 (id, owner_uid, title, messages, created_at, last_updated,
                  starred, shared, parent_conversation_id, branch_from_message_index,
                  children_branches)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                conv.id,
                conv.owner_uid,
                conv.title,
                messages,
                conv.created_at,
                conv.last_updated,
                conv.starred,
                conv.shared,
                conv.parent_conversation_id,
                conv.branch_from_message_index.map(|i| i as i64),
                children,
            ],
        )?;
        Ok(())
    }

    /// Get a conversation by id.
    pub fn get_by_id(conn: &Connection, id: &str) -> Result<Option<Conversation>> {
        let row = conn
            .query_row(
                "SELECT id, owner_uid, title, messages, created_at, last_updated,
                        starred, shared, parent_conversation_id, branch_from_message_index,
                        children_branches
                 FROM conversations WHERE id = ?1",
                params![id],
                Self::map_row,
            )
            .optional()?;
        row.map(ConversationRow::decode).transpose()
    }

    /// Top-level conversations for an owner, most recently updated first.
    pub fn list_top_level(conn: &Connection, owner_uid: &str) -> Result<Vec<ConversationSummary>> {
        let mut stmt = conn.prepare(
            "SELECT id, title, last_updated, starred
             FROM conversations
             WHERE owner_uid = ?1 AND parent_conversation_id IS NULL
             ORDER BY last_updated DESC",
        )?;
        let rows = stmt
            .query_map(params![owner_uid], |row| {
                Ok(ConversationSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    last_updated: row.get(2)?,
                    starred: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Immediate (single-level) children of a conversation.
    pub fn children_of(conn: &Connection, parent_id: &str) -> Result<Vec<Conversation>> {
        let mut stmt = conn.prepare(
            "SELECT id, owner_uid, title, messages, created_at, last_updated,
                    starred, shared, parent_conversation_id, branch_from_message_index,
                    children_branches
             FROM conversations WHERE parent_conversation_id = ?1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![parent_id], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(ConversationRow::decode).collect()
    }

    /// Overwrite the whole messages field and bump `last_updated`.
    pub fn set_messages(
        conn: &Connection,
        id: &str,
        messages: &[ChatMessage],
        now: &str,
    ) -> Result<bool> {
        let json = serde_json::to_string(messages)?;
        let changed = conn.execute(
            "UPDATE conversations SET messages = ?1, last_updated = ?2 WHERE id = ?3",
            params![json, now, id],
        )?;
        Ok(changed > 0)
    }

    /// Set the display title.
    pub fn set_title(conn: &Connection, id: &str, title: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE conversations SET title = ?1 WHERE id = ?2",
            params![title, id],
        )?;
        Ok(changed > 0)
    }

    /// Toggle the starred flag.
    pub fn set_starred(conn: &Connection, id: &str, starred: bool) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE conversations SET starred = ?1 WHERE id = ?2",
            params![starred, id],
        )?;
        Ok(changed > 0)
    }

    /// Toggle the shared flag.
    pub fn set_shared(conn: &Connection, id: &str, shared: bool) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE conversations SET shared = ?1 WHERE id = ?2",
            params![shared, id],
        )?;
        Ok(changed > 0)
    }

    /// Append a branch back-reference to `children_branches`.
    ///
    /// Duplicates are allowed: repeated edits at the same index register
    /// one entry each.
    pub fn append_child_branch(conn: &Connection, parent_id: &str, child: &BranchRef) -> Result<bool> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT children_branches FROM conversations WHERE id = ?1",
                params![parent_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(false);
        };
        let mut children: Vec<BranchRef> = serde_json::from_str(&raw).unwrap_or_default();
        children.push(child.clone());
        let json = serde_json::to_string(&children)?;
        let changed = conn.execute(
            "UPDATE conversations SET children_branches = ?1 WHERE id = ?2",
            params![json, parent_id],
        )?;
        Ok(changed > 0)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
        Ok(ConversationRow {
            id: row.get(0)?,
            owner_uid: row.get(1)?,
            title: row.get(2)?,
            messages_json: row.get(3)?,
            created_at: row.get(4)?,
            last_updated: row.get(5)?,
            starred: row.get(6)?,
            shared: row.get(7)?,
            parent_conversation_id: row.get(8)?,
            branch_from_message_index: row.get(9)?,
            children_json: row.get(10)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
