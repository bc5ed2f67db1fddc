//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Billing events (idempotency store + audit trail), keyed by provider
    /// event id.
    pub const EVENTS: &str = "events";

    /// Subscription rows, keyed by provider subscription id.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Credit balance rows, keyed by `user_id`.
    pub const BALANCES: &str = "balances";

    /// Credit transactions, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: transactions by user, keyed by `user_id || transaction_id`.
    /// Value is empty (index only).
    pub const TRANSACTIONS_BY_USER: &str = "transactions_by_user";

    /// Posting dedup markers, keyed by `user_id|related_type|related_id`.
    /// Value is empty (presence is the fact).
    pub const POSTINGS: &str = "postings";

    /// Trial rows, keyed by `user_id` (one per user, lifetime).
    pub const TRIALS: &str = "trials";

    /// Coupon rows, keyed by code.
    pub const COUPONS: &str = "coupons";

    /// Payment attempt history, keyed by `user_id || ulid`.
    pub const PAYMENT_ATTEMPTS: &str = "payment_attempts";

    /// Fraud alerts, keyed by `alert_id`.
    pub const FRAUD_ALERTS: &str = "fraud_alerts";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::EVENTS,
        cf::SUBSCRIPTIONS,
        cf::BALANCES,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_USER,
        cf::POSTINGS,
        cf::TRIALS,
        cf::COUPONS,
        cf::PAYMENT_ATTEMPTS,
        cf::FRAUD_ALERTS,
    ]
}
