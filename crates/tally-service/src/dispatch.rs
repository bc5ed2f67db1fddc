//! Event dispatcher.
//!
//! Pure routing from [`EventType`] to a handler. Unknown event types are
//! logged and treated as success so new provider event types never break
//! processing. Every handler is individually idempotent, which is what makes
//! at-least-once dispatch safe.

use chrono::Utc;

use tally_core::{BillingEvent, EventType, LedgerError, PaymentAttempt, Related, TransactionType};
use tally_store::StoreError;

use crate::error::ApiError;
use crate::notify::Notification;
use crate::state::AppState;
use crate::subscription;

/// Route one persisted billing event to its handler.
pub async fn dispatch(state: &AppState, event: &BillingEvent) -> Result<(), ApiError> {
    let data = event
        .payload
        .get("data")
        .unwrap_or(&serde_json::Value::Null);

    match &event.event_type {
        EventType::SubscriptionCreated | EventType::SubscriptionUpdated => {
            subscription::apply_update(state, data)
        }
        EventType::SubscriptionDeleted => subscription::apply_deletion(state, data),
        EventType::TrialWillEnd => handle_trial_will_end(state, data),
        EventType::InvoicePaymentSucceeded => handle_payment_succeeded(state, data),
        EventType::InvoicePaymentFailed => handle_payment_failed(state, data),
        EventType::CheckoutCompleted => handle_checkout_completed(state, data),
        EventType::CheckoutExpired => {
            let session_id = data.get("id").and_then(|v| v.as_str()).unwrap_or("unknown");
            tracing::info!(session_id = %session_id, "Checkout session expired");
            Ok(())
        }
        EventType::Unknown(name) => {
            tracing::debug!(event_type = %name, "Unhandled provider event");
            Ok(())
        }
    }
}

fn handle_trial_will_end(state: &AppState, data: &serde_json::Value) -> Result<(), ApiError> {
    let Some(user_id) = resolve_customer(state, data) else {
        return Ok(());
    };

    tracing::info!(user_id = %user_id, "Provider trial ending soon");
    state.notify(Notification::TrialEndingSoon { user_id });
    Ok(())
}

fn handle_payment_succeeded(state: &AppState, data: &serde_json::Value) -> Result<(), ApiError> {
    let Some(user_id) = resolve_customer(state, data) else {
        return Ok(());
    };
    let amount = invoice_amount(data);

    state.store.record_payment_attempt(&PaymentAttempt {
        user_id,
        amount,
        succeeded: true,
        at: Utc::now(),
    })?;

    tracing::info!(user_id = %user_id, amount = %amount, "Invoice payment succeeded");
    Ok(())
}

fn handle_payment_failed(state: &AppState, data: &serde_json::Value) -> Result<(), ApiError> {
    let Some(user_id) = resolve_customer(state, data) else {
        return Ok(());
    };
    let amount = invoice_amount(data);

    state.store.record_payment_attempt(&PaymentAttempt {
        user_id,
        amount,
        succeeded: false,
        at: Utc::now(),
    })?;

    tracing::warn!(user_id = %user_id, amount = %amount, "Invoice payment failed");
    state.notify(Notification::PaymentFailed {
        user_id,
        amount: Some(amount),
    });
    Ok(())
}

fn handle_checkout_completed(state: &AppState, data: &serde_json::Value) -> Result<(), ApiError> {
    let session_id = data.get("id").and_then(|v| v.as_str()).unwrap_or("unknown");
    let payment_status = data
        .get("payment_status")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");

    if payment_status != "paid" {
        tracing::info!(
            session_id = %session_id,
            payment_status = %payment_status,
            "Checkout session not paid yet, skipping"
        );
        return Ok(());
    }

    let user_id_str = data
        .get("client_reference_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::BadRequest("Missing client_reference_id".into()))?;
    let Some(user_id) = state.directory.resolve(user_id_str) else {
        tracing::warn!(customer = %user_id_str, "No local user for checkout, nothing to credit");
        return Ok(());
    };

    let credits_amount = data
        .get("metadata")
        .and_then(|m| m.get("credits_amount"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<i64>().ok())
        .or_else(|| data.get("amount_total").and_then(serde_json::Value::as_i64))
        .unwrap_or(0);

    if credits_amount <= 0 {
        tracing::warn!(session_id = %session_id, "Checkout completed without a credit amount");
        return Ok(());
    }

    // The session id is the dedup key: a redelivered or differently-wrapped
    // completion for the same session must not post twice.
    let result = state.store.credit(
        &user_id,
        credits_amount,
        TransactionType::Purchase,
        Some(Related::new("checkout", session_id)),
        &format!("Credit purchase via checkout session {session_id}"),
    );
    match result {
        Ok(tx) => {
            tracing::info!(
                user_id = %user_id,
                credits_added = %credits_amount,
                new_balance = %tx.balance_after,
                transaction_id = %tx.id,
                "Credits added from checkout"
            );
        }
        Err(StoreError::Ledger(LedgerError::DuplicatePosting { .. })) => {
            tracing::debug!(session_id = %session_id, "Checkout already credited");
        }
        Err(err) => return Err(err.into()),
    }

    state.store.record_payment_attempt(&PaymentAttempt {
        user_id,
        amount: data
            .get("amount_total")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(credits_amount),
        succeeded: true,
        at: Utc::now(),
    })?;

    // Coupon redemption happens only after the purchase actually completed.
    // The money already moved, so a redemption failure is logged, not raised.
    if let Some(code) = data
        .get("metadata")
        .and_then(|m| m.get("coupon_code"))
        .and_then(|v| v.as_str())
    {
        match state.store.redeem_coupon(code, &user_id) {
            Ok(coupon) => {
                tracing::info!(code = %code, uses = %coupon.current_uses, "Coupon redeemed");
            }
            Err(err) => {
                tracing::warn!(code = %code, error = %err, "Coupon redemption failed after paid checkout");
            }
        }
    }

    Ok(())
}

/// Resolve the event's customer to a local user.
///
/// A missing local user is not a transient fault: the handler logs and the
/// event completes successfully (nothing to reconcile).
fn resolve_customer(state: &AppState, data: &serde_json::Value) -> Option<tally_core::UserId> {
    let customer = data.get("customer").and_then(|v| v.as_str())?;
    let resolved = state.directory.resolve(customer);
    if resolved.is_none() {
        tracing::info!(customer = %customer, "No local user for provider customer");
    }
    resolved
}

fn invoice_amount(data: &serde_json::Value) -> i64 {
    data.get("amount_due")
        .or_else(|| data.get("amount_paid"))
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0)
}
