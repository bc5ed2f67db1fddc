//! Subscription records and status machine rules.
//!
//! The stored [`Subscription`] is reconciled by overwrite: every relevant
//! provider event carries the full current state, and the handler upserts the
//! row keyed by the provider subscription id instead of computing a delta.
//! That makes redelivery naturally idempotent. Out-of-order delivery is
//! guarded by the `current_period_end` version marker (see
//! [`Subscription::is_stale_update`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SubscriptionId, UserId};

/// Status of a subscription, mirroring the provider lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// In the provider-managed trial period.
    Trialing,

    /// Paid and current.
    Active,

    /// A renewal payment failed; the provider is retrying.
    PastDue,

    /// Retries exhausted; access should be withdrawn.
    Unpaid,

    /// Cancelled, either by the user or by deletion at the provider.
    Canceled,

    /// Initial payment never completed and the window elapsed.
    IncompleteExpired,
}

impl SubscriptionStatus {
    /// Return the provider wire name for this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Unpaid => "unpaid",
            Self::Canceled => "canceled",
            Self::IncompleteExpired => "incomplete_expired",
        }
    }

    /// Parse a provider status string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "trialing" => Some(Self::Trialing),
            "active" => Some(Self::Active),
            "past_due" => Some(Self::PastDue),
            "unpaid" => Some(Self::Unpaid),
            "canceled" | "cancelled" => Some(Self::Canceled),
            "incomplete_expired" => Some(Self::IncompleteExpired),
            _ => None,
        }
    }

    /// Whether no further transitions are expected from this status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::IncompleteExpired)
    }
}

/// How often the subscription bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    /// Billed every month.
    Monthly,

    /// Billed every year.
    Yearly,
}

impl BillingCycle {
    /// Parse a provider interval string, defaulting to monthly.
    #[must_use]
    pub fn parse_or_monthly(value: Option<&str>) -> Self {
        match value {
            Some("year" | "yearly" | "annual") => Self::Yearly,
            _ => Self::Monthly,
        }
    }
}

/// One logical row per provider subscription id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Provider subscription id (row key).
    pub id: SubscriptionId,

    /// The local user this subscription belongs to.
    pub user_id: UserId,

    /// The plan the user subscribed to.
    pub plan_id: String,

    /// Current status, overwritten on every relevant event.
    pub status: SubscriptionStatus,

    /// Billing cadence.
    pub billing_cycle: BillingCycle,

    /// When the subscription started.
    pub start_date: DateTime<Utc>,

    /// Next renewal date, when the provider reports one.
    pub next_billing_date: Option<DateTime<Utc>>,

    /// End of the current billing period. Doubles as the version marker for
    /// the out-of-order delivery guard: the provider moves it monotonically
    /// forward on every renewal.
    pub current_period_end: Option<DateTime<Utc>>,

    /// When the subscription was cancelled, if it was.
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Whether an incoming update is older than the stored state.
    ///
    /// An update is stale when both sides carry a period-end marker and the
    /// incoming one is strictly older. Events without a marker are applied
    /// unconditionally (the overwrite design accepts that residual risk).
    #[must_use]
    pub fn is_stale_update(&self, incoming_period_end: Option<DateTime<Utc>>) -> bool {
        match (self.current_period_end, incoming_period_end) {
            (Some(stored), Some(incoming)) => incoming < stored,
            _ => false,
        }
    }

    /// The dedup key for the renewal credit grant of the current period.
    ///
    /// Keyed by subscription id plus period end so each billing period grants
    /// exactly once, no matter how often the activation event is redelivered.
    #[must_use]
    pub fn grant_dedup_key(&self) -> String {
        match self.current_period_end {
            Some(end) => format!("{}:{}", self.id, end.timestamp()),
            None => self.id.to_string(),
        }
    }
}

/// Whether a status change crosses into `active` (grants renewal credits).
#[must_use]
pub fn entered_active(previous: Option<SubscriptionStatus>, new: SubscriptionStatus) -> bool {
    new == SubscriptionStatus::Active && previous != Some(SubscriptionStatus::Active)
}

/// Whether a status change leaves `active` for a non-paying status
/// (downgrades the user's cohort).
#[must_use]
pub fn left_active(previous: Option<SubscriptionStatus>, new: SubscriptionStatus) -> bool {
    previous == Some(SubscriptionStatus::Active)
        && matches!(
            new,
            SubscriptionStatus::Canceled
                | SubscriptionStatus::Unpaid
                | SubscriptionStatus::PastDue
                | SubscriptionStatus::IncompleteExpired
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sub(status: SubscriptionStatus, period_end: Option<DateTime<Utc>>) -> Subscription {
        Subscription {
            id: SubscriptionId::new("sub_1"),
            user_id: UserId::generate(),
            plan_id: "pro".into(),
            status,
            billing_cycle: BillingCycle::Monthly,
            start_date: Utc::now(),
            next_billing_date: None,
            current_period_end: period_end,
            cancelled_at: None,
        }
    }

    #[test]
    fn status_parse_roundtrip() {
        for s in [
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Unpaid,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::IncompleteExpired,
        ] {
            assert_eq!(SubscriptionStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(SubscriptionStatus::parse("paused"), None);
    }

    #[test]
    fn activation_guards() {
        assert!(entered_active(None, SubscriptionStatus::Active));
        assert!(entered_active(
            Some(SubscriptionStatus::Trialing),
            SubscriptionStatus::Active
        ));
        assert!(entered_active(
            Some(SubscriptionStatus::PastDue),
            SubscriptionStatus::Active
        ));
        assert!(!entered_active(
            Some(SubscriptionStatus::Active),
            SubscriptionStatus::Active
        ));

        assert!(left_active(
            Some(SubscriptionStatus::Active),
            SubscriptionStatus::Canceled
        ));
        assert!(left_active(
            Some(SubscriptionStatus::Active),
            SubscriptionStatus::PastDue
        ));
        assert!(!left_active(
            Some(SubscriptionStatus::Trialing),
            SubscriptionStatus::Canceled
        ));
        assert!(!left_active(Some(SubscriptionStatus::Active), SubscriptionStatus::Active));
    }

    #[test]
    fn stale_update_detection() {
        let now = Utc::now();
        let stored = sub(SubscriptionStatus::Canceled, Some(now));

        assert!(stored.is_stale_update(Some(now - Duration::days(30))));
        assert!(!stored.is_stale_update(Some(now + Duration::days(30))));
        assert!(!stored.is_stale_update(Some(now)));
        // No marker on either side: apply unconditionally.
        assert!(!stored.is_stale_update(None));
        assert!(!sub(SubscriptionStatus::Active, None).is_stale_update(Some(now)));
    }

    #[test]
    fn grant_dedup_key_changes_per_period() {
        let now = Utc::now();
        let first = sub(SubscriptionStatus::Active, Some(now));
        let second = sub(SubscriptionStatus::Active, Some(now + Duration::days(30)));
        assert_ne!(first.grant_dedup_key(), second.grant_dedup_key());
    }
}
