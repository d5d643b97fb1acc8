//! User repository — CRUD for the `users` table.
//!
//! The user document carries the credit fields and the JSON-encoded
//! graph history. Credit decrements are conditional UPDATEs so a
//! concurrent decrement can never drive the balance negative.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::warn;

use sage_core::graph::GraphHistory;
use sage_core::user::{SubscriptionPlan, SubscriptionStatus, UserRecord};

use crate::errors::Result;

/// Options for creating a new user.
pub struct NewUser<'a> {
    /// User id.
    pub uid: &'a str,
    /// Display name.
    pub name: &'a str,
    /// Email, if known.
    pub email: Option<&'a str>,
}

/// User repository — stateless, every method takes `&Connection`.
pub struct UserRepo;

impl UserRepo {
    /// Create a new user with zero credits and no subscription.
    pub fn create(conn: &Connection, opts: &NewUser<'_>) -> Result<UserRecord> {
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO users (uid, name, email, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![opts.uid, opts.name, opts.email, now],
        )?;
        Ok(UserRecord {
            uid: opts.uid.to_string(),
            name: opts.name.to_string(),
            email: opts.email.map(String::from),
            preferences: String::new(),
            credits: 0,
            subscription_plan: None,
            subscription_status: None,
            subscription_expires: None,
            last_credit_refresh: None,
            last_used: None,
        })
    }

    /// Get a user by uid.
    pub fn get(conn: &Connection, uid: &str) -> Result<Option<UserRecord>> {
        let row = conn
            .query_row(
                "SELECT uid, name, email, preferences, credits, subscription_plan,
                        subscription_status, subscription_expires, last_credit_refresh, last_used
                 FROM users WHERE uid = ?1",
                params![uid],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Replace the preference prose.
    pub fn set_preferences(conn: &Connection, uid: &str, preferences: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE users SET preferences = ?1 WHERE uid = ?2",
            params![preferences, uid],
        )?;
        Ok(changed > 0)
    }

    /// Unconditionally add credits (purchase / subscription activation).
    pub fn add_credits(conn: &Connection, uid: &str, amount: i64) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE users SET credits = credits + ?1 WHERE uid = ?2",
            params![amount, uid],
        )?;
        Ok(changed > 0)
    }

    /// Conditional decrement: subtracts `amount` and stamps `last_used`
    /// only when the balance covers it. Returns `false` when it does not
    /// (or the user is missing) — the row is untouched in that case.
    pub fn try_deduct(conn: &Connection, uid: &str, amount: i64, now: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE users SET credits = credits - ?1, last_used = ?2
             WHERE uid = ?3 AND credits >= ?1",
            params![amount, now, uid],
        )?;
        Ok(changed > 0)
    }

    /// Reset the balance to `allotment` and stamp `last_credit_refresh`.
    ///
    /// This is an overwrite, not an add: unspent purchased credits are
    /// discarded. Kept as observed in production pending product review.
    pub fn apply_refresh(conn: &Connection, uid: &str, allotment: i64, now: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE users SET credits = ?1, last_credit_refresh = ?2 WHERE uid = ?3",
            params![allotment, now, uid],
        )?;
        Ok(changed > 0)
    }

    /// Set subscription plan/status/expiry (billing webhook transitions).
    pub fn set_subscription(
        conn: &Connection,
        uid: &str,
        plan: Option<SubscriptionPlan>,
        status: Option<SubscriptionStatus>,
        expires: Option<&str>,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE users SET subscription_plan = ?1, subscription_status = ?2,
                              subscription_expires = ?3
             WHERE uid = ?4",
            params![
                plan.map(SubscriptionPlan::as_str),
                status.map(SubscriptionStatus::as_str),
                expires,
                uid
            ],
        )?;
        Ok(changed > 0)
    }

    /// Load the graph history column. Absent or malformed JSON yields
    /// `None` — the patch engine starts from an empty snapshot then.
    pub fn get_graph_history(conn: &Connection, uid: &str) -> Result<Option<GraphHistory>> {
        let raw: Option<Option<String>> = conn
            .query_row(
                "SELECT graph_history FROM users WHERE uid = ?1",
                params![uid],
                |row| row.get(0),
            )
            .optional()?;
        let Some(Some(json)) = raw else {
            return Ok(None);
        };
        match serde_json::from_str::<GraphHistory>(&json) {
            Ok(history) => Ok(Some(history)),
            Err(err) => {
                warn!(uid, %err, "malformed graph history; treating as absent");
                Ok(None)
            }
        }
    }

    /// Overwrite the graph history column.
    pub fn set_graph_history(conn: &Connection, uid: &str, history: &GraphHistory) -> Result<bool> {
        let json = serde_json::to_string(history)?;
        let changed = conn.execute(
            "UPDATE users SET graph_history = ?1 WHERE uid = ?2",
            params![json, uid],
        )?;
        Ok(changed > 0)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
        let plan: Option<String> = row.get(5)?;
        let status: Option<String> = row.get(6)?;
        Ok(UserRecord {
            uid: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            preferences: row.get(3)?,
            credits: row.get(4)?,
            subscription_plan: plan.as_deref().and_then(SubscriptionPlan::parse),
            subscription_status: status.as_deref().and_then(SubscriptionStatus::parse),
            subscription_expires: row.get(7)?,
            last_credit_refresh: row.get(8)?,
            last_used: row.get(9)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
