//! The fraud gate.
//!
//! Assembles a [`RiskContext`] from stored payment attempts plus the request's
//! own signals, runs the rule evaluator, persists a review alert when the
//! score lands in the review band, and blocks the operation outright at the
//! block threshold. The gate is read-only with respect to the ledger and runs
//! **before** any charge or debit is attempted.

use chrono::Utc;

use tally_core::{FraudAlert, LedgerError, RiskContext, RiskReport, UserId};

use crate::error::ApiError;
use crate::state::AppState;

/// Request-side signals the caller forwards into the gate.
#[derive(Debug, Clone, Default)]
pub struct RequestSignals {
    /// Payment method descriptor, when known.
    pub payment_method: Option<String>,

    /// Billing country code, when known.
    pub billing_country: Option<String>,

    /// Request IP address.
    pub ip: Option<String>,

    /// Request user agent.
    pub user_agent: Option<String>,

    /// Age of the account in hours. Callers that don't know pass a large
    /// value so the new-account rule stays quiet.
    pub account_age_hours: Option<i64>,
}

/// Run the gate for an attempted transaction.
///
/// # Errors
///
/// `ApiError::FraudBlocked` when the score reaches the block threshold; the
/// caller must halt. A report with `requires_review` set is not an error:
/// the operation proceeds and the persisted alert waits for human review.
pub fn assess(
    state: &AppState,
    user_id: UserId,
    amount: i64,
    signals: &RequestSignals,
) -> Result<RiskReport, ApiError> {
    let stats = state.store.payment_stats(&user_id, Utc::now())?;

    let ctx = RiskContext {
        user_id,
        amount,
        payment_method: signals.payment_method.clone(),
        billing_country: signals.billing_country.clone(),
        ip: signals.ip.clone(),
        user_agent: signals.user_agent.clone(),
        account_age_hours: signals.account_age_hours.unwrap_or(i64::MAX),
        failed_attempts_24h: stats.failed_24h,
        successful_payments_24h: stats.succeeded_24h,
        average_payment_amount: stats.average_amount,
    };
    let report = state.evaluator.analyze(&ctx);

    // Alerts are persisted for anything at or above the review threshold,
    // blocked transactions included.
    if report.requires_review || report.should_block {
        state
            .store
            .put_alert(&FraudAlert::from_report(user_id, &report))?;
        tracing::warn!(
            user_id = %user_id,
            risk_score = %report.risk_score,
            flags = ?report.flags,
            "Transaction flagged for review"
        );
    }

    if report.should_block {
        tracing::warn!(
            user_id = %user_id,
            risk_score = %report.risk_score,
            flags = ?report.flags,
            "Transaction blocked by fraud gate"
        );
        return Err(LedgerError::FraudBlocked {
            risk_score: report.risk_score,
        }
        .into());
    }

    Ok(report)
}
