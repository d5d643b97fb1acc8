//! Connection pool construction.
//!
//! WAL journal, foreign keys on, and a busy timeout on every pooled
//! connection. In-memory pools use a shared-cache URI so all pooled
//! connections see the same database.

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use uuid::Uuid;

use crate::errors::Result;

/// Pool alias used across the crate.
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;
/// Pooled connection alias.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pool tuning knobs.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum pooled connections.
    pub max_size: u32,
    /// SQLite busy timeout per connection, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

fn init_pragmas(busy_timeout_ms: u64) -> impl Fn(&mut rusqlite::Connection) -> rusqlite::Result<()> {
    move |conn: &mut rusqlite::Connection| {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = {busy_timeout_ms};"
        ))
    }
}

/// Build a pool over a database file at `path`.
pub fn new_file(path: &str, config: &ConnectionConfig) -> Result<ConnectionPool> {
    let manager =
        SqliteConnectionManager::file(path).with_init(init_pragmas(config.busy_timeout_ms));
    let pool = r2d2::Pool::builder()
        .max_size(config.max_size)
        .build(manager)?;
    Ok(pool)
}

/// Build a pool over a fresh in-memory database (shared across the pool).
pub fn new_in_memory(config: &ConnectionConfig) -> Result<ConnectionPool> {
    // Unique name per pool; shared cache ties the pooled connections together.
    let uri = format!("file:sage_mem_{}?mode=memory&cache=shared", Uuid::now_v7());
    let manager = SqliteConnectionManager::file(uri)
        .with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_init(init_pragmas(config.busy_timeout_ms));
    let pool = r2d2::Pool::builder()
        .max_size(config.max_size)
        .build(manager)?;
    Ok(pool)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
