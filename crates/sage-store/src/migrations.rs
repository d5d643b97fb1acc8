//! Schema migrations.

use rusqlite::Connection;

use crate::errors::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    uid TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT 'User',
    email TEXT,
    preferences TEXT NOT NULL DEFAULT '',
    credits INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0),
    subscription_plan TEXT,
    subscription_status TEXT,
    subscription_expires TEXT,
    last_credit_refresh TEXT,
    last_used TEXT,
    graph_history TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    owner_uid TEXT NOT NULL REFERENCES users(uid),
    title TEXT NOT NULL,
    messages TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    starred INTEGER NOT NULL DEFAULT 0,
    shared INTEGER NOT NULL DEFAULT 0,
    parent_conversation_id TEXT,
    branch_from_message_index INTEGER,
    children_branches TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_conversations_owner
    ON conversations(owner_uid, last_updated DESC);

CREATE INDEX IF NOT EXISTS idx_conversations_parent
    ON conversations(parent_conversation_id);
";

/// Apply the schema. Idempotent.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
