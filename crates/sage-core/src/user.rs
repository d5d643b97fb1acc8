//! User records, subscription plans, and credit balances.
//!
//! The credit fields on [`UserRecord`] are owned exclusively by the
//! credit ledger; other components treat them as read-only.

use serde::{Deserialize, Serialize};

/// Subscription tier. Each tier grants a fixed monthly credit allotment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPlan {
    /// Entry tier.
    Basic,
    /// Mid tier.
    Pro,
    /// Top tier.
    Premium,
}

impl SubscriptionPlan {
    /// Fixed monthly credit allotment for this plan.
    #[must_use]
    pub fn monthly_allotment(self) -> i64 {
        match self {
            Self::Basic => 500,
            Self::Pro => 2_000,
            Self::Premium => 10_000,
        }
    }

    /// Parse from the stored string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basic" => Some(Self::Basic),
            "pro" => Some(Self::Pro),
            "premium" => Some(Self::Premium),
            _ => None,
        }
    }

    /// Stored string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Premium => "premium",
        }
    }
}

/// Subscription lifecycle state as reported by the billing webhook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Paid up; credits refresh monthly.
    Active,
    /// Cancelled by the user; no further refreshes.
    Canceled,
    /// Payment failed; no further refreshes until resolved.
    PastDue,
}

impl SubscriptionStatus {
    /// Parse from the stored string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "canceled" => Some(Self::Canceled),
            "past_due" => Some(Self::PastDue),
            _ => None,
        }
    }

    /// Stored string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Canceled => "canceled",
            Self::PastDue => "past_due",
        }
    }
}

/// A persisted user document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// User id.
    pub uid: String,
    /// Display name.
    pub name: String,
    /// Email address, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Free-form preference prose injected into the system prompt.
    pub preferences: String,
    /// Current credit balance. Never negative.
    pub credits: i64,
    /// Subscription tier, if subscribed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_plan: Option<SubscriptionPlan>,
    /// Subscription lifecycle state, if subscribed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<SubscriptionStatus>,
    /// ISO 8601 expiry of the current subscription period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_expires: Option<String>,
    /// ISO 8601 time of the last monthly credit refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_credit_refresh: Option<String>,
    /// ISO 8601 time of the last successful deduction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<String>,
}

/// Read-only snapshot of a user's credit state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditBalance {
    /// Current credit balance.
    pub credits: i64,
    /// Subscription tier, if subscribed.
    pub plan: Option<SubscriptionPlan>,
    /// Subscription lifecycle state, if subscribed.
    pub status: Option<SubscriptionStatus>,
    /// ISO 8601 expiry of the current period.
    pub expires: Option<String>,
    /// ISO 8601 time of the last monthly refresh.
    pub last_refresh: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
