//! Trial lifecycle manager.
//!
//! One trial per user, lifetime. `start` creates the row and posts the trial
//! credit grant to the ledger with the trial id as dedup key; expiry is a
//! pure status transition that never claws back granted credits.

use chrono::{Duration, Utc};

use tally_core::{
    LedgerError, Related, SubscriptionId, TransactionType, Trial, TrialStatus, UserId,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Start a trial and post its credit grant.
///
/// # Errors
///
/// `TrialAlreadyExists` (as a conflict) if the user ever had a trial.
pub fn start(
    state: &AppState,
    user_id: UserId,
    plan_id: &str,
    duration_days: i64,
    credits_limit: i64,
) -> Result<Trial, ApiError> {
    let trial = Trial::start(user_id, plan_id, duration_days, credits_limit);
    state.store.create_trial(&trial)?;

    // The grant is keyed by the trial id; since the row above is the one
    // trial this user will ever have, the posting can never double.
    let tx = state.store.credit(
        &user_id,
        credits_limit,
        TransactionType::TrialCredit,
        Some(Related::new("trial", trial.id.to_string())),
        &format!("Trial credits for plan {plan_id}"),
    )?;

    tracing::info!(
        user_id = %user_id,
        trial_id = %trial.id,
        credits_granted = %credits_limit,
        new_balance = %tx.balance_after,
        "Trial started"
    );
    Ok(trial)
}

/// Whether the user's trial is active right now.
pub fn is_active(state: &AppState, user_id: &UserId) -> Result<bool, ApiError> {
    Ok(state
        .store
        .get_trial(user_id)?
        .is_some_and(|t| t.is_active(Utc::now())))
}

/// Track trial-specific consumption against the cap.
///
/// This only maintains trial accounting; the generic usage debit is a
/// separate ledger call made by the caller.
pub fn consume(state: &AppState, user_id: &UserId, amount: i64) -> Result<Trial, ApiError> {
    let trial = state
        .store
        .get_trial(user_id)?
        .ok_or(LedgerError::TrialNotFound {
            user_id: user_id.to_string(),
        })
        .map_err(ApiError::from)?;
    if !trial.is_active(Utc::now()) {
        return Err(LedgerError::TrialNotActive {
            status: format!("{:?}", trial.status).to_lowercase(),
        }
        .into());
    }

    Ok(state.store.consume_trial_credits(user_id, amount)?)
}

/// Undo a trial consumption whose paired ledger debit was rejected.
///
/// No status check: the consumption being undone already happened, so the
/// release must go through even if the trial expired in between.
pub fn release(state: &AppState, user_id: &UserId, amount: i64) -> Result<Trial, ApiError> {
    Ok(state.store.release_trial_credits(user_id, amount)?)
}

/// Push the trial window forward by `extension_days`.
///
/// An explicit user or operator action; not required to be idempotent.
pub fn extend(
    state: &AppState,
    user_id: &UserId,
    extension_days: i64,
    coupon_code: Option<&str>,
) -> Result<Trial, ApiError> {
    let mut trial = state
        .store
        .get_trial(user_id)?
        .ok_or(LedgerError::TrialNotFound {
            user_id: user_id.to_string(),
        })
        .map_err(ApiError::from)?;

    trial.end_date += Duration::days(extension_days);
    state.store.update_trial(&trial)?;

    tracing::info!(
        user_id = %user_id,
        extension_days = %extension_days,
        coupon_code = ?coupon_code,
        new_end_date = %trial.end_date,
        "Trial extended"
    );
    Ok(trial)
}

/// Mark the trial converted; only valid from `active`.
pub fn convert(
    state: &AppState,
    user_id: &UserId,
    subscription_id: &SubscriptionId,
) -> Result<Trial, ApiError> {
    transition(state, user_id, TrialStatus::Converted, |trial| {
        tracing::info!(
            user_id = %trial.user_id,
            subscription_id = %subscription_id,
            "Trial converted to subscription"
        );
    })
}

/// Mark the trial cancelled; only valid from `active`.
pub fn cancel(state: &AppState, user_id: &UserId) -> Result<Trial, ApiError> {
    transition(state, user_id, TrialStatus::Cancelled, |trial| {
        tracing::info!(user_id = %trial.user_id, "Trial cancelled");
    })
}

fn transition(
    state: &AppState,
    user_id: &UserId,
    to: TrialStatus,
    on_success: impl FnOnce(&Trial),
) -> Result<Trial, ApiError> {
    let mut trial = state
        .store
        .get_trial(user_id)?
        .ok_or(LedgerError::TrialNotFound {
            user_id: user_id.to_string(),
        })
        .map_err(ApiError::from)?;

    if trial.status != TrialStatus::Active {
        return Err(LedgerError::TrialNotActive {
            status: format!("{:?}", trial.status).to_lowercase(),
        }
        .into());
    }

    trial.status = to;
    state.store.update_trial(&trial)?;
    on_success(&trial);
    Ok(trial)
}
