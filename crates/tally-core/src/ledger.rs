//! Credit ledger types.
//!
//! The ledger is an append-only transaction log plus a materialized balance
//! row per user. Invariant:
//! `current_balance == total_earned - total_spent == Σ transaction amounts`.
//! The storage layer enforces it by writing the balance row and the
//! transaction row as one atomic unit; these types only describe the data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{TransactionId, UserId};

/// Materialized balance for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditBalance {
    /// The user this balance belongs to.
    pub user_id: UserId,

    /// Spendable credits right now.
    pub current_balance: i64,

    /// Lifetime credits earned (sum of positive transactions).
    pub total_earned: i64,

    /// Lifetime credits spent (sum of negative transactions, as a positive number).
    pub total_spent: i64,

    /// When the balance row was last written.
    pub updated_at: DateTime<Utc>,
}

impl CreditBalance {
    /// A zero-valued balance for a user the ledger has never touched.
    #[must_use]
    pub fn zero(user_id: UserId) -> Self {
        Self {
            user_id,
            current_balance: 0,
            total_earned: 0,
            total_spent: 0,
            updated_at: Utc::now(),
        }
    }

    /// Whether the balance covers a debit of `amount`.
    #[must_use]
    pub const fn covers(&self, amount: i64) -> bool {
        self.current_balance >= amount
    }
}

/// Type of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// User purchased credits through checkout.
    Purchase,

    /// Renewal credits granted when a subscription period activates.
    SubscriptionCredit,

    /// One-time grant when a trial starts.
    TrialCredit,

    /// Credits consumed by feature usage.
    UsageDebit,

    /// Promotional or administrative grant.
    Bonus,

    /// Refund issued back to the balance.
    Refund,
}

impl TransactionType {
    /// Whether this type adds credits.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(
            self,
            Self::Purchase | Self::SubscriptionCredit | Self::TrialCredit | Self::Bonus | Self::Refund
        )
    }

    /// Whether this type removes credits.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::UsageDebit)
    }
}

/// A reference to the record that caused a posting.
///
/// `(user_id, related_type, related_id)` is the dedup key that prevents
/// double-posting when the same provider event is redelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Related {
    /// What kind of record the id refers to (e.g. `subscription`, `trial`).
    pub related_type: String,

    /// The related record's identifier.
    pub related_id: String,
}

impl Related {
    /// Build a related reference.
    #[must_use]
    pub fn new(related_type: impl Into<String>, related_id: impl Into<String>) -> Self {
        Self {
            related_type: related_type.into(),
            related_id: related_id.into(),
        }
    }

    /// The dedup key for this reference scoped to a user.
    #[must_use]
    pub fn dedup_key(&self, user_id: &UserId) -> String {
        format!("{user_id}|{}|{}", self.related_type, self.related_id)
    }
}

/// One append-only ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction id (ULID for time-ordering).
    pub id: TransactionId,

    /// The user whose balance changed.
    pub user_id: UserId,

    /// Type of transaction.
    pub tx_type: TransactionType,

    /// Signed amount: positive for credits, negative for debits.
    pub amount: i64,

    /// Balance before this transaction.
    pub balance_before: i64,

    /// Balance after this transaction.
    pub balance_after: i64,

    /// Reference to the originating record, when there is one.
    pub related: Option<Related>,

    /// Human-readable description.
    pub description: String,

    /// When the transaction was posted.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Build a credit (positive) entry from a known prior balance.
    #[must_use]
    pub fn credit(
        user_id: UserId,
        tx_type: TransactionType,
        amount: i64,
        balance_before: i64,
        related: Option<Related>,
        description: impl Into<String>,
    ) -> Self {
        let amount = amount.abs();
        Self {
            id: TransactionId::generate(),
            user_id,
            tx_type,
            amount,
            balance_before,
            balance_after: balance_before + amount,
            related,
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    /// Build a debit (negative) entry from a known prior balance.
    #[must_use]
    pub fn debit(
        user_id: UserId,
        tx_type: TransactionType,
        amount: i64,
        balance_before: i64,
        related: Option<Related>,
        description: impl Into<String>,
    ) -> Self {
        let amount = amount.abs();
        Self {
            id: TransactionId::generate(),
            user_id,
            tx_type,
            amount: -amount,
            balance_before,
            balance_after: balance_before - amount,
            related,
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    /// The dedup key of this transaction, if it carries a related reference.
    #[must_use]
    pub fn dedup_key(&self) -> Option<String> {
        self.related.as_ref().map(|r| r.dedup_key(&self.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_entry_is_positive() {
        let user = UserId::generate();
        let tx = CreditTransaction::credit(
            user,
            TransactionType::TrialCredit,
            100,
            0,
            Some(Related::new("trial", "trial-1")),
            "Trial grant",
        );
        assert_eq!(tx.amount, 100);
        assert_eq!(tx.balance_before, 0);
        assert_eq!(tx.balance_after, 100);
        assert!(tx.dedup_key().is_some());
    }

    #[test]
    fn debit_entry_is_negative() {
        let user = UserId::generate();
        let tx = CreditTransaction::debit(
            user,
            TransactionType::UsageDebit,
            30,
            100,
            None,
            "Feature use",
        );
        assert_eq!(tx.amount, -30);
        assert_eq!(tx.balance_before, 100);
        assert_eq!(tx.balance_after, 70);
        assert!(tx.dedup_key().is_none());
    }

    #[test]
    fn dedup_key_is_user_scoped() {
        let related = Related::new("subscription", "sub_1:1700000000");
        let a = related.dedup_key(&UserId::generate());
        let b = related.dedup_key(&UserId::generate());
        assert_ne!(a, b);
    }

    #[test]
    fn transaction_type_direction() {
        assert!(TransactionType::Purchase.is_credit());
        assert!(TransactionType::SubscriptionCredit.is_credit());
        assert!(TransactionType::TrialCredit.is_credit());
        assert!(TransactionType::Bonus.is_credit());
        assert!(TransactionType::Refund.is_credit());
        assert!(!TransactionType::UsageDebit.is_credit());
        assert!(TransactionType::UsageDebit.is_debit());
    }

    #[test]
    fn zero_balance_covers_nothing() {
        let balance = CreditBalance::zero(UserId::generate());
        assert!(balance.covers(0));
        assert!(!balance.covers(1));
    }
}
