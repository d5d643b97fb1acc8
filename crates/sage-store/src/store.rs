//! High-level [`DocumentStore`] API.
//!
//! Wraps the connection pool and both repositories behind user- and
//! conversation-centric methods. Graph-history writes are read-modify-
//! write on a JSON column, so they are serialized per user with an
//! in-process lock map; everything else is a single targeted statement.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::instrument;

use sage_core::conversation::{BranchRef, Conversation, ConversationSummary};
use sage_core::graph::GraphHistory;
use sage_core::ids::now_rfc3339;
use sage_core::messages::ChatMessage;
use sage_core::user::{SubscriptionPlan, SubscriptionStatus, UserRecord};

use crate::connection::{ConnectionConfig, ConnectionPool, PooledConnection, new_in_memory};
use crate::errors::{Result, StoreError};
use crate::migrations::run_migrations;
use crate::repositories::conversation::ConversationRepo;
use crate::repositories::user::{NewUser, UserRepo};

/// High-level document store over the pooled SQLite database.
pub struct DocumentStore {
    pool: ConnectionPool,
    /// Per-user graph-history write locks, pruned opportunistically.
    graph_locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl DocumentStore {
    /// Wrap an existing pool. Migrations must already have run.
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            graph_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh in-memory store with migrations applied. Used by tests and
    /// local tooling.
    pub fn open_in_memory() -> Result<Self> {
        let pool = new_in_memory(&ConnectionConfig::default())?;
        {
            let conn = pool.get()?;
            run_migrations(&conn)?;
        }
        Ok(Self::new(pool))
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    fn user_graph_lock(&self, uid: &str) -> Arc<Mutex<()>> {
        let mut locks = self.graph_locks.lock();
        if locks.len() > 128 {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }
        if let Some(existing) = locks.get(uid).and_then(Weak::upgrade) {
            return existing;
        }
        let lock = Arc::new(Mutex::new(()));
        let _ = locks.insert(uid.to_owned(), Arc::downgrade(&lock));
        lock
    }

    // ── Users ───────────────────────────────────────────────────────────

    /// Create a user document.
    pub fn create_user(&self, uid: &str, name: &str, email: Option<&str>) -> Result<UserRecord> {
        UserRepo::create(&*self.conn()?, &NewUser { uid, name, email })
    }

    /// Get a user, erroring when absent.
    pub fn get_user(&self, uid: &str) -> Result<UserRecord> {
        UserRepo::get(&*self.conn()?, uid)?.ok_or_else(|| StoreError::UserNotFound(uid.to_owned()))
    }

    /// Get a user, `None` when absent.
    pub fn try_get_user(&self, uid: &str) -> Result<Option<UserRecord>> {
        UserRepo::get(&*self.conn()?, uid)
    }

    /// Replace the preference prose.
    pub fn set_preferences(&self, uid: &str, preferences: &str) -> Result<()> {
        if UserRepo::set_preferences(&*self.conn()?, uid, preferences)? {
            Ok(())
        } else {
            Err(StoreError::UserNotFound(uid.to_owned()))
        }
    }

    /// Unconditionally add credits.
    pub fn add_credits(&self, uid: &str, amount: i64) -> Result<()> {
        if UserRepo::add_credits(&*self.conn()?, uid, amount)? {
            Ok(())
        } else {
            Err(StoreError::UserNotFound(uid.to_owned()))
        }
    }

    /// Conditional decrement; `false` when the balance cannot cover it.
    pub fn try_deduct(&self, uid: &str, amount: i64) -> Result<bool> {
        UserRepo::try_deduct(&*self.conn()?, uid, amount, &now_rfc3339())
    }

    /// Reset the balance to `allotment` and stamp the refresh time.
    pub fn apply_refresh(&self, uid: &str, allotment: i64) -> Result<()> {
        if UserRepo::apply_refresh(&*self.conn()?, uid, allotment, &now_rfc3339())? {
            Ok(())
        } else {
            Err(StoreError::UserNotFound(uid.to_owned()))
        }
    }

    /// Apply a billing-webhook subscription transition.
    pub fn set_subscription(
        &self,
        uid: &str,
        plan: Option<SubscriptionPlan>,
        status: Option<SubscriptionStatus>,
        expires: Option<&str>,
    ) -> Result<()> {
        if UserRepo::set_subscription(&*self.conn()?, uid, plan, status, expires)? {
            Ok(())
        } else {
            Err(StoreError::UserNotFound(uid.to_owned()))
        }
    }

    // ── Conversations ───────────────────────────────────────────────────

    /// Insert a conversation document.
    pub fn create_conversation(&self, conv: &Conversation) -> Result<()> {
        ConversationRepo::create(&*self.conn()?, conv)
    }

    /// Get a conversation, erroring when absent.
    pub fn get_conversation(&self, id: &str) -> Result<Conversation> {
        ConversationRepo::get_by_id(&*self.conn()?, id)?
            .ok_or_else(|| StoreError::ConversationNotFound(id.to_owned()))
    }

    /// Get a conversation, `None` when absent.
    pub fn try_get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        ConversationRepo::get_by_id(&*self.conn()?, id)
    }

    /// Top-level conversations for an owner, newest activity first.
    pub fn list_conversations(&self, owner_uid: &str) -> Result<Vec<ConversationSummary>> {
        ConversationRepo::list_top_level(&*self.conn()?, owner_uid)
    }

    /// Immediate children of a conversation.
    pub fn conversation_children(&self, id: &str) -> Result<Vec<Conversation>> {
        ConversationRepo::children_of(&*self.conn()?, id)
    }

    /// Overwrite the messages field (last write wins) and bump activity.
    pub fn set_messages(&self, id: &str, messages: &[ChatMessage]) -> Result<()> {
        if ConversationRepo::set_messages(&*self.conn()?, id, messages, &now_rfc3339())? {
            Ok(())
        } else {
            Err(StoreError::ConversationNotFound(id.to_owned()))
        }
    }

    /// Set the conversation title.
    pub fn set_title(&self, id: &str, title: &str) -> Result<()> {
        if ConversationRepo::set_title(&*self.conn()?, id, title)? {
            Ok(())
        } else {
            Err(StoreError::ConversationNotFound(id.to_owned()))
        }
    }

    /// Toggle the starred flag.
    pub fn set_starred(&self, id: &str, starred: bool) -> Result<()> {
        if ConversationRepo::set_starred(&*self.conn()?, id, starred)? {
            Ok(())
        } else {
            Err(StoreError::ConversationNotFound(id.to_owned()))
        }
    }

    /// Toggle the shared flag.
    pub fn set_shared(&self, id: &str, shared: bool) -> Result<()> {
        if ConversationRepo::set_shared(&*self.conn()?, id, shared)? {
            Ok(())
        } else {
            Err(StoreError::ConversationNotFound(id.to_owned()))
        }
    }

    /// Register a branch back-reference on the parent (duplicates kept).
    pub fn register_child_branch(&self, parent_id: &str, child: &BranchRef) -> Result<()> {
        if ConversationRepo::append_child_branch(&*self.conn()?, parent_id, child)? {
            Ok(())
        } else {
            Err(StoreError::ConversationNotFound(parent_id.to_owned()))
        }
    }

    // ── Graph history ───────────────────────────────────────────────────

    /// The user's graph history; empty when absent or malformed.
    pub fn graph_history(&self, uid: &str) -> Result<GraphHistory> {
        Ok(UserRepo::get_graph_history(&*self.conn()?, uid)?.unwrap_or_default())
    }

    /// Load, mutate, and store the user's graph history under the
    /// per-user write lock. Returns the stored history.
    #[instrument(skip(self, mutate))]
    pub fn with_graph_history<F>(&self, uid: &str, mutate: F) -> Result<GraphHistory>
    where
        F: FnOnce(&mut GraphHistory),
    {
        let lock = self.user_graph_lock(uid);
        let _guard = lock.lock();

        let conn = self.conn()?;
        let mut history = UserRepo::get_graph_history(&conn, uid)?.unwrap_or_default();
        mutate(&mut history);
        if !UserRepo::set_graph_history(&conn, uid, &history)? {
            return Err(StoreError::UserNotFound(uid.to_owned()));
        }
        Ok(history)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
