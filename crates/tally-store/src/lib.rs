//! Storage layer for the tally billing engine.
//!
//! This crate defines the [`Store`] trait and two backends:
//!
//! - [`MemoryStore`]: the default backend. All tables live behind one mutex,
//!   so every compound operation is trivially atomic. Used by the service in
//!   single-node deployments and by every test.
//! - `RocksStore` (feature `rocksdb-backend`): persistent backend using
//!   column families, CBOR values, `WriteBatch` atomicity, and a per-key lock
//!   map to serialize read-modify-write cycles.
//!
//! # Atomicity contract
//!
//! The ledger methods ([`Store::credit`], [`Store::debit`]) read the balance,
//! build the transaction, and write both rows as one unit while holding the
//! lock for that user. Two concurrent postings for the same user can never
//! observe the same `balance_before`. The same contract covers
//! [`Store::redeem_coupon`] (per code) and [`Store::consume_trial_credits`]
//! (per user).

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};
use tally_core::{
    BillingEvent, Coupon, CreditBalance, CreditTransaction, FraudAlert, PaymentAttempt,
    PaymentStats, Related, Subscription, SubscriptionId, TransactionType, Trial, UserId,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (in-memory, `RocksDB`).
pub trait Store: Send + Sync {
    // =========================================================================
    // Billing Event Operations (durable idempotency store + audit trail)
    // =========================================================================

    /// Persist a billing event row. Called at ingress before dispatch.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_event(&self, event: &BillingEvent) -> Result<()>;

    /// Get a billing event by provider event id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_event(&self, event_id: &str) -> Result<Option<BillingEvent>>;

    /// Mark an event as processed and clear any recorded error.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the event doesn't exist.
    fn mark_event_processed(&self, event_id: &str) -> Result<()>;

    /// Record a dispatch failure on the event row, leaving it retryable.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the event doesn't exist.
    fn record_event_error(&self, event_id: &str, error: &str) -> Result<()>;

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Insert or overwrite a subscription row (reconciliation by overwrite).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn upsert_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Get a subscription by provider subscription id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>>;

    // =========================================================================
    // Credit Ledger Operations
    // =========================================================================

    /// Get the balance row for a user; zero-valued if never touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_balance(&self, user_id: &UserId) -> Result<CreditBalance>;

    /// List transactions for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    /// Post a credit: balance row and transaction row written as one unit.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` if `amount <= 0`.
    /// - `LedgerError::DuplicatePosting` if a transaction with the same
    ///   `(user, related)` dedup key already exists.
    fn credit(
        &self,
        user_id: &UserId,
        amount: i64,
        tx_type: TransactionType,
        related: Option<Related>,
        description: &str,
    ) -> Result<CreditTransaction>;

    /// Post a debit: balance row and transaction row written as one unit.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` if `amount <= 0`.
    /// - `LedgerError::InsufficientBalance` if the balance doesn't cover it.
    /// - `LedgerError::DuplicatePosting` on a dedup key collision.
    fn debit(
        &self,
        user_id: &UserId,
        amount: i64,
        tx_type: TransactionType,
        related: Option<Related>,
        description: &str,
    ) -> Result<CreditTransaction>;

    // =========================================================================
    // Trial Operations
    // =========================================================================

    /// Insert a trial row; one per user, lifetime.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::TrialAlreadyExists` if the user ever had one.
    fn create_trial(&self, trial: &Trial) -> Result<()>;

    /// Get the trial for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_trial(&self, user_id: &UserId) -> Result<Option<Trial>>;

    /// Overwrite a trial row (status flips, extensions).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the trial doesn't exist.
    fn update_trial(&self, trial: &Trial) -> Result<()>;

    /// Atomically bump `credits_used` if the cap allows it.
    ///
    /// Returns the updated trial.
    ///
    /// # Errors
    ///
    /// - `LedgerError::TrialNotFound` if the user has no trial.
    /// - `LedgerError::TrialCreditsExceeded` if the cap would be exceeded.
    fn consume_trial_credits(&self, user_id: &UserId, amount: i64) -> Result<Trial>;

    /// Return previously consumed trial credits to the cap.
    ///
    /// The undo of [`Store::consume_trial_credits`] for when the ledger
    /// posting paired with a consumption is rejected. Saturates at zero
    /// rather than erroring on over-release.
    ///
    /// Returns the updated trial.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` if `amount <= 0`.
    /// - `LedgerError::TrialNotFound` if the user has no trial.
    fn release_trial_credits(&self, user_id: &UserId, amount: i64) -> Result<Trial>;

    /// Flip every active trial whose window closed before `now` to expired.
    ///
    /// Returns the number of trials expired. Idempotent: each run only
    /// transitions rows whose precondition still holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn expire_trials(&self, now: DateTime<Utc>) -> Result<usize>;

    // =========================================================================
    // Coupon Operations
    // =========================================================================

    /// Insert or overwrite a coupon.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_coupon(&self, coupon: &Coupon) -> Result<()>;

    /// Get a coupon by code.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_coupon(&self, code: &str) -> Result<Option<Coupon>>;

    /// Atomically redeem a coupon for a user.
    ///
    /// The exhaustion and prior-use checks and the increment/append happen
    /// as one conditional update under the coupon's lock, so two concurrent
    /// redemptions of a near-exhausted coupon cannot both succeed.
    ///
    /// Returns the updated coupon.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the code is unknown.
    /// - `LedgerError::CouponExhausted` if the cap is reached.
    /// - `LedgerError::CouponAlreadyUsed` if the user already redeemed it.
    fn redeem_coupon(&self, code: &str, user_id: &UserId) -> Result<Coupon>;

    // =========================================================================
    // Fraud Operations
    // =========================================================================

    /// Record a payment attempt for history-based risk rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn record_payment_attempt(&self, attempt: &PaymentAttempt) -> Result<()>;

    /// Aggregate a user's attempt history into the stats risk rules consume.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn payment_stats(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<PaymentStats>;

    /// Persist a fraud alert for human review.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_alert(&self, alert: &FraudAlert) -> Result<()>;

    /// List alerts still pending review.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_pending_alerts(&self) -> Result<Vec<FraudAlert>>;
}
