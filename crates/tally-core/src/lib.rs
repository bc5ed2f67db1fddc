//! Core types and pure logic for the tally billing engine.
//!
//! This crate provides the foundational types used throughout tally:
//!
//! - **Identifiers**: `UserId`, `SubscriptionId`, `TransactionId`, `TrialId`, `AlertId`
//! - **Events**: `BillingEvent`, `EventType`
//! - **Subscriptions**: `Subscription`, `SubscriptionStatus`, `BillingCycle`
//! - **Ledger**: `CreditBalance`, `CreditTransaction`, `TransactionType`, `Related`
//! - **Trials**: `Trial`, `TrialStatus`
//! - **Coupons**: `Coupon`, `CouponType`
//! - **Fraud**: `RiskEvaluator`, `RiskRule`, `RiskReport`, `FraudAlert`
//! - **Plans**: `Plan`, `PlanCatalog`
//!
//! # Credit Unit
//!
//! Credits are stored as `i64`. One credit is the smallest billable unit;
//! monetary amounts are integer cents. No floating point anywhere near the
//! ledger.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod coupon;
pub mod error;
pub mod event;
pub mod fraud;
pub mod ids;
pub mod ledger;
pub mod plans;
pub mod subscription;
pub mod trial;

pub use coupon::{Coupon, CouponType};
pub use error::{LedgerError, Result};
pub use event::{BillingEvent, EventType};
pub use fraud::{
    AlertStatus, FraudAlert, PaymentAttempt, PaymentStats, RiskContext, RiskEvaluator, RiskLevel,
    RiskReport, RiskRule, RiskSignal,
};
pub use ids::{AlertId, IdError, SubscriptionId, TransactionId, TrialId, UserId};
pub use ledger::{CreditBalance, CreditTransaction, Related, TransactionType};
pub use plans::{
    Plan, PlanCatalog, DEFAULT_TRIAL_CREDITS, DEFAULT_TRIAL_DAYS, PRO_PLAN_CREDITS,
    PRO_PLAN_PRICE, STARTER_PLAN_CREDITS, STARTER_PLAN_PRICE,
};
pub use subscription::{
    entered_active, left_active, BillingCycle, Subscription, SubscriptionStatus,
};
pub use trial::{Trial, TrialStatus};
