//! Trial lifecycle types.
//!
//! One trial per user, lifetime. The trial carries its own usage cap
//! (`credits_limit` / `credits_used`) independent of the ledger balance: the
//! grant is posted to the ledger once at start, while `credits_used` tracks
//! trial-specific accounting only.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{TrialId, UserId};

/// Status of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// Running and within its window.
    Active,

    /// Window elapsed without conversion.
    Expired,

    /// User subscribed before the window elapsed.
    Converted,

    /// Cancelled by the user or an operator.
    Cancelled,
}

/// One row per user, created by `start_trial` and never replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    /// Trial id; used as the ledger dedup key for the grant.
    pub id: TrialId,

    /// The user on trial.
    pub user_id: UserId,

    /// The plan being trialed.
    pub plan_id: String,

    /// When the trial started.
    pub start_date: DateTime<Utc>,

    /// When the trial window closes.
    pub end_date: DateTime<Utc>,

    /// Cap on trial credit consumption.
    pub credits_limit: i64,

    /// Trial credits consumed so far.
    pub credits_used: i64,

    /// Current lifecycle status.
    pub status: TrialStatus,
}

impl Trial {
    /// Start a new trial running for `duration_days` from now.
    #[must_use]
    pub fn start(user_id: UserId, plan_id: impl Into<String>, duration_days: i64, credits_limit: i64) -> Self {
        let now = Utc::now();
        Self {
            id: TrialId::generate(),
            user_id,
            plan_id: plan_id.into(),
            start_date: now,
            end_date: now + Duration::days(duration_days),
            credits_limit,
            credits_used: 0,
            status: TrialStatus::Active,
        }
    }

    /// Whether the trial is active at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == TrialStatus::Active && now <= self.end_date
    }

    /// Trial credits still available under the cap.
    #[must_use]
    pub const fn credits_remaining(&self) -> i64 {
        self.credits_limit - self.credits_used
    }

    /// Whether a consumption of `amount` fits under the cap.
    #[must_use]
    pub const fn can_consume(&self, amount: i64) -> bool {
        self.credits_used + amount <= self.credits_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_trial_is_active() {
        let trial = Trial::start(UserId::generate(), "pro", 14, 500);
        assert!(trial.is_active(Utc::now()));
        assert_eq!(trial.credits_remaining(), 500);
    }

    #[test]
    fn trial_inactive_after_window() {
        let trial = Trial::start(UserId::generate(), "pro", 14, 500);
        let after = trial.end_date + Duration::seconds(1);
        assert!(!trial.is_active(after));
    }

    #[test]
    fn trial_inactive_when_converted() {
        let mut trial = Trial::start(UserId::generate(), "pro", 14, 500);
        trial.status = TrialStatus::Converted;
        assert!(!trial.is_active(Utc::now()));
    }

    #[test]
    fn consumption_cap() {
        let mut trial = Trial::start(UserId::generate(), "pro", 14, 100);
        trial.credits_used = 90;
        assert!(trial.can_consume(10));
        assert!(!trial.can_consume(11));
    }
}
