//! Error taxonomy for the billing engine.

use crate::ids::IdError;

/// Result type for core billing operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Domain errors raised by the ledger, trials, coupons, and the fraud gate.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Balance does not cover the requested debit.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// A transaction with the same dedup key already exists.
    #[error("duplicate posting for {related_type}:{related_id}")]
    DuplicatePosting {
        /// The related record type.
        related_type: String,
        /// The related record id.
        related_id: String,
    },

    /// The user already had a trial (one per user, lifetime).
    #[error("trial already exists for user {user_id}")]
    TrialAlreadyExists {
        /// The user that already had a trial.
        user_id: String,
    },

    /// Consumption would exceed the trial credit cap.
    #[error("trial credits exceeded: used={used}, limit={limit}, requested={requested}")]
    TrialCreditsExceeded {
        /// Credits consumed so far.
        used: i64,
        /// The trial cap.
        limit: i64,
        /// The requested consumption.
        requested: i64,
    },

    /// The trial is not in a state that allows the operation.
    #[error("trial is not active: {status}")]
    TrialNotActive {
        /// The trial's current status.
        status: String,
    },

    /// No trial exists for the user.
    #[error("no trial for user {user_id}")]
    TrialNotFound {
        /// The user without a trial.
        user_id: String,
    },

    /// A coupon rule failed (inactive, not yet valid, below minimum purchase).
    #[error("coupon invalid: {0}")]
    CouponInvalid(String),

    /// The coupon's validity window has passed.
    #[error("coupon expired")]
    CouponExpired,

    /// The coupon's redemption cap is reached.
    #[error("coupon exhausted")]
    CouponExhausted,

    /// The user already redeemed this coupon.
    #[error("coupon already used by this user")]
    CouponAlreadyUsed,

    /// The fraud gate blocked the transaction.
    #[error("transaction blocked by fraud gate (risk score {risk_score})")]
    FraudBlocked {
        /// The score that triggered the block.
        risk_score: u32,
    },

    /// A non-positive or otherwise invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
