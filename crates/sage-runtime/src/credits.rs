//! Credit ledger: balance reads, monthly refresh, and the deduct gate.
//!
//! Deduction is the one synchronous gate on the turn path. It refreshes
//! first, then issues a conditional decrement so a concurrent deduct can
//! never drive the balance negative. Any store failure on the deduct
//! path counts as a rejection — the ledger fails closed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use tracing::{debug, info, warn};

use sage_core::constants::REFRESH_WINDOW_DAYS;
use sage_core::user::{CreditBalance, SubscriptionStatus, UserRecord};
use sage_store::DocumentStore;

use crate::errors::Result;

/// Credit metering over the user document.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<DocumentStore>,
}

impl CreditLedger {
    /// New ledger over the given store.
    #[must_use]
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    /// Read-only balance snapshot.
    pub fn get_balance(&self, uid: &str) -> Result<CreditBalance> {
        let user = self.store.get_user(uid)?;
        Ok(CreditBalance {
            credits: user.credits,
            plan: user.subscription_plan,
            status: user.subscription_status,
            expires: user.subscription_expires,
            last_refresh: user.last_credit_refresh,
        })
    }

    /// Reset the balance to the plan allotment when a refresh is due.
    ///
    /// Only active subscriptions refresh. A refresh is due when there is
    /// no prior refresh stamp or the stamp is at least 30 days old. The
    /// reset overwrites the balance, discarding unspent purchased
    /// credits. Kept as observed in production pending product review.
    pub fn refresh_if_due(&self, uid: &str) -> Result<()> {
        let user = self.store.get_user(uid)?;
        if user.subscription_status != Some(SubscriptionStatus::Active) {
            return Ok(());
        }
        let Some(plan) = user.subscription_plan else {
            return Ok(());
        };
        if !Self::refresh_due(&user) {
            return Ok(());
        }

        let allotment = plan.monthly_allotment();
        self.store.apply_refresh(uid, allotment)?;
        info!(uid, allotment, plan = plan.as_str(), "monthly credit refresh applied");
        counter!("sage_credit_refreshes_total").increment(1);
        Ok(())
    }

    /// Whether the 30-day refresh window has elapsed.
    fn refresh_due(user: &UserRecord) -> bool {
        let Some(stamp) = user.last_credit_refresh.as_deref() else {
            return true;
        };
        match DateTime::parse_from_rfc3339(stamp) {
            Ok(last) => {
                Utc::now().signed_duration_since(last) >= Duration::days(REFRESH_WINDOW_DAYS)
            }
            Err(err) => {
                // Unreadable stamp: refresh rather than starve the user.
                warn!(uid = %user.uid, %err, "unparseable last_credit_refresh; treating refresh as due");
                true
            }
        }
    }

    /// Deduct `amount` for a turn. Runs the refresh first, then a
    /// conditional decrement. Returns `false` when the balance cannot
    /// cover it or when any store operation fails.
    pub fn deduct(&self, uid: &str, amount: i64) -> bool {
        if let Err(err) = self.refresh_if_due(uid) {
            warn!(uid, %err, "credit refresh failed; rejecting deduction");
            counter!("sage_credit_deductions_failed_total").increment(1);
            return false;
        }
        match self.store.try_deduct(uid, amount) {
            Ok(true) => {
                debug!(uid, amount, "credits deducted");
                counter!("sage_credit_deductions_total").increment(1);
                true
            }
            Ok(false) => {
                debug!(uid, amount, "insufficient credits");
                counter!("sage_credit_deductions_rejected_total").increment(1);
                false
            }
            Err(err) => {
                warn!(uid, %err, "credit deduction store error; rejecting");
                counter!("sage_credit_deductions_failed_total").increment(1);
                false
            }
        }
    }

    /// Unconditional credit grant (purchase, subscription activation).
    pub fn add_credits(&self, uid: &str, amount: i64) -> Result<()> {
        self.store.add_credits(uid, amount)?;
        info!(uid, amount, "credits added");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
