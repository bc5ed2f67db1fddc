//! Tally HTTP API Service.
//!
//! This crate provides the HTTP API for the tally billing engine, including:
//!
//! - Provider webhook ingress with signature verification and idempotency
//! - Event dispatch to the subscription state machine and trial manager
//! - Credit balance, transactions, and ledger postings
//! - Trial lifecycle operations
//! - Coupon validation and redemption
//! - Fraud-gated checkout
//!
//! # Webhook processing
//!
//! Events arrive at-least-once and possibly out of order. Ingress persists
//! every new event before dispatch, each handler is individually idempotent,
//! and subscription updates carry a period-end version marker so stale
//! redeliveries cannot regress state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Some handlers need async for consistency

pub mod config;
pub mod crypto;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod ingress;
pub mod jobs;
pub mod notify;
pub mod routes;
pub mod state;
pub mod subscription;
pub mod trial;

pub use config::ServiceConfig;
pub use directory::{Cohort, StaticDirectory, UserDirectory};
pub use error::ApiError;
pub use notify::{LogNotifier, Notification, Notifier};
pub use routes::create_router;
pub use state::AppState;
