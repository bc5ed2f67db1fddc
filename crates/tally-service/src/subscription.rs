//! Subscription state machine.
//!
//! Reconciliation by overwrite: every relevant event carries the provider's
//! full current state, and the handler upserts the stored row instead of
//! computing a delta. Redelivery is therefore naturally idempotent; the
//! period-end version marker guards against out-of-order delivery regressing
//! newer state.

use chrono::{DateTime, TimeZone, Utc};

use tally_core::{
    entered_active, left_active, BillingCycle, LedgerError, Related, Subscription, SubscriptionId,
    SubscriptionStatus, TransactionType, UserId,
};
use tally_store::StoreError;

use crate::directory::Cohort;
use crate::error::ApiError;
use crate::notify::Notification;
use crate::state::AppState;

/// The fields a subscription event embeds.
#[derive(Debug)]
struct SubscriptionUpdate {
    id: SubscriptionId,
    user_id: UserId,
    plan_id: String,
    status: SubscriptionStatus,
    billing_cycle: BillingCycle,
    start_date: Option<DateTime<Utc>>,
    next_billing_date: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

/// Apply a `subscription_created` / `subscription_updated` event.
pub fn apply_update(state: &AppState, data: &serde_json::Value) -> Result<(), ApiError> {
    let Some(update) = parse_update(state, data)? else {
        return Ok(());
    };

    reconcile(state, update)
}

/// Apply a `subscription_deleted` event: status becomes canceled,
/// `cancelled_at` is stamped, and the deactivation guard fires.
pub fn apply_deletion(state: &AppState, data: &serde_json::Value) -> Result<(), ApiError> {
    let Some(mut update) = parse_update(state, data)? else {
        return Ok(());
    };

    update.status = SubscriptionStatus::Canceled;
    update.cancelled_at = Some(Utc::now());
    reconcile(state, update)
}

fn reconcile(state: &AppState, update: SubscriptionUpdate) -> Result<(), ApiError> {
    let previous = state.store.get_subscription(&update.id)?;

    if let Some(stored) = &previous {
        if stored.is_stale_update(update.current_period_end) {
            tracing::info!(
                subscription_id = %update.id,
                stored_period_end = ?stored.current_period_end,
                incoming_period_end = ?update.current_period_end,
                "Ignoring out-of-order subscription update"
            );
            return Ok(());
        }
    }

    let previous_status = previous.as_ref().map(|s| s.status);
    let row = Subscription {
        id: update.id.clone(),
        user_id: update.user_id,
        plan_id: update.plan_id.clone(),
        status: update.status,
        billing_cycle: update.billing_cycle,
        start_date: update
            .start_date
            .or_else(|| previous.as_ref().map(|s| s.start_date))
            .unwrap_or_else(Utc::now),
        next_billing_date: update
            .next_billing_date
            .or_else(|| previous.as_ref().and_then(|s| s.next_billing_date)),
        current_period_end: update
            .current_period_end
            .or_else(|| previous.as_ref().and_then(|s| s.current_period_end)),
        cancelled_at: update
            .cancelled_at
            .or_else(|| previous.as_ref().and_then(|s| s.cancelled_at)),
    };

    state.store.upsert_subscription(&row)?;
    tracing::info!(
        subscription_id = %row.id,
        user_id = %row.user_id,
        status = %row.status.as_str(),
        previous_status = ?previous_status.map(|s| s.as_str()),
        "Subscription reconciled"
    );

    if entered_active(previous_status, row.status) {
        grant_period_credits(state, &row)?;
        state.directory.assign_cohort(&row.user_id, Cohort::Paying);
        if previous_status.is_none() || previous_status == Some(SubscriptionStatus::Trialing) {
            state.notify(Notification::Welcome {
                user_id: row.user_id,
                plan_id: row.plan_id.clone(),
            });
        }
    } else if left_active(previous_status, row.status) {
        state.directory.assign_cohort(&row.user_id, Cohort::Free);
        if row.status == SubscriptionStatus::Canceled {
            state.notify(Notification::SubscriptionCancelled {
                user_id: row.user_id,
            });
        }
    }

    Ok(())
}

/// Post the plan's included credits for the current billing period.
///
/// The dedup key is subscription id plus period end, so each period grants
/// exactly once no matter how often the activation event is redelivered.
fn grant_period_credits(state: &AppState, row: &Subscription) -> Result<(), ApiError> {
    let credits = state.config.plans.credits_for(&row.plan_id);
    if credits <= 0 {
        tracing::debug!(plan_id = %row.plan_id, "Plan has no credits to grant");
        return Ok(());
    }

    let result = state.store.credit(
        &row.user_id,
        credits,
        TransactionType::SubscriptionCredit,
        Some(Related::new("subscription", row.grant_dedup_key())),
        &format!("Subscription credits for plan {}", row.plan_id),
    );
    match result {
        Ok(tx) => {
            tracing::info!(
                user_id = %row.user_id,
                credits_granted = %credits,
                new_balance = %tx.balance_after,
                transaction_id = %tx.id,
                "Subscription credits granted"
            );
            Ok(())
        }
        Err(StoreError::Ledger(LedgerError::DuplicatePosting { .. })) => {
            tracing::debug!(
                subscription_id = %row.id,
                "Period credits already granted"
            );
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Extract the update from the event's data object.
///
/// Returns `Ok(None)` in the log-and-succeed cases: an unresolvable customer
/// (nothing to reconcile) or a status this engine does not know.
fn parse_update(
    state: &AppState,
    data: &serde_json::Value,
) -> Result<Option<SubscriptionUpdate>, ApiError> {
    let id = data
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::BadRequest("Missing subscription id".into()))?;
    let customer = data
        .get("customer")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::BadRequest("Missing customer".into()))?;

    let Some(user_id) = state.directory.resolve(customer) else {
        tracing::info!(
            subscription_id = %id,
            customer = %customer,
            "No local user for provider customer, nothing to reconcile"
        );
        return Ok(None);
    };

    let status_str = data
        .get("status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::BadRequest("Missing subscription status".into()))?;
    let Some(status) = SubscriptionStatus::parse(status_str) else {
        tracing::warn!(
            subscription_id = %id,
            status = %status_str,
            "Unknown subscription status, skipping"
        );
        return Ok(None);
    };

    Ok(Some(SubscriptionUpdate {
        id: SubscriptionId::new(id),
        user_id,
        plan_id: data
            .get("plan_id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        status,
        billing_cycle: BillingCycle::parse_or_monthly(
            data.get("billing_cycle").and_then(|v| v.as_str()),
        ),
        start_date: timestamp_field(data, "start_date"),
        next_billing_date: timestamp_field(data, "next_billing_date"),
        current_period_end: timestamp_field(data, "current_period_end"),
        cancelled_at: timestamp_field(data, "cancelled_at"),
    }))
}

fn timestamp_field(data: &serde_json::Value, field: &str) -> Option<DateTime<Utc>> {
    let seconds = data.get(field)?.as_i64()?;
    Utc.timestamp_opt(seconds, 0).single()
}
