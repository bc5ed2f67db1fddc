//! Trial lifecycle handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use tally_core::{SubscriptionId, Trial, UserId};

use crate::error::ApiError;
use crate::state::AppState;
use crate::trial;

/// Trial response.
#[derive(Debug, Serialize)]
pub struct TrialResponse {
    /// Trial id.
    pub trial_id: String,
    /// The user on trial.
    pub user_id: String,
    /// The plan being trialed.
    pub plan_id: String,
    /// Lifecycle status.
    pub status: String,
    /// When the trial started.
    pub start_date: String,
    /// When the trial window closes.
    pub end_date: String,
    /// Cap on trial credit consumption.
    pub credits_limit: i64,
    /// Trial credits consumed so far.
    pub credits_used: i64,
    /// Trial credits still available under the cap.
    pub credits_remaining: i64,
}

impl From<&Trial> for TrialResponse {
    fn from(t: &Trial) -> Self {
        Self {
            trial_id: t.id.to_string(),
            user_id: t.user_id.to_string(),
            plan_id: t.plan_id.clone(),
            status: format!("{:?}", t.status).to_lowercase(),
            start_date: t.start_date.to_rfc3339(),
            end_date: t.end_date.to_rfc3339(),
            credits_limit: t.credits_limit,
            credits_used: t.credits_used,
            credits_remaining: t.credits_remaining(),
        }
    }
}

/// Start-trial request.
#[derive(Debug, Deserialize)]
pub struct StartTrialRequest {
    /// The user starting a trial.
    pub user_id: UserId,
    /// The plan to trial (default "starter").
    pub plan_id: Option<String>,
}

/// Start a trial for a user.
pub async fn start_trial(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartTrialRequest>,
) -> Result<Json<TrialResponse>, ApiError> {
    let plan_id = body.plan_id.as_deref().unwrap_or("starter");
    let trial = trial::start(
        &state,
        body.user_id,
        plan_id,
        state.config.trial_days,
        state.config.trial_credits,
    )?;

    Ok(Json(TrialResponse::from(&trial)))
}

/// Get a user's trial.
pub async fn get_trial(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<TrialResponse>, ApiError> {
    let trial = state
        .store
        .get_trial(&user_id)?
        .ok_or_else(|| ApiError::NotFound("Trial not found".into()))?;

    Ok(Json(TrialResponse::from(&trial)))
}

/// Extend-trial request.
#[derive(Debug, Deserialize)]
pub struct ExtendTrialRequest {
    /// The user whose trial to extend.
    pub user_id: UserId,
    /// Days to add to the trial window.
    pub extension_days: i64,
    /// Promotional coupon authorizing the extension, if any.
    pub coupon_code: Option<String>,
}

/// Extend a trial window.
///
/// When a coupon code is supplied it is redeemed first, so an exhausted or
/// already-used coupon rejects the extension before anything changes.
pub async fn extend_trial(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExtendTrialRequest>,
) -> Result<Json<TrialResponse>, ApiError> {
    if body.extension_days <= 0 {
        return Err(ApiError::BadRequest("Extension days must be positive".into()));
    }

    if let Some(code) = &body.coupon_code {
        super::coupons::redeem_checked(&state, code, &body.user_id, None)?;
    }

    let trial = trial::extend(
        &state,
        &body.user_id,
        body.extension_days,
        body.coupon_code.as_deref(),
    )?;
    Ok(Json(TrialResponse::from(&trial)))
}

/// Convert-trial request.
#[derive(Debug, Deserialize)]
pub struct ConvertTrialRequest {
    /// The user whose trial converted.
    pub user_id: UserId,
    /// The subscription the trial converted into.
    pub subscription_id: String,
}

/// Mark a trial converted to a paid subscription.
pub async fn convert_trial(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConvertTrialRequest>,
) -> Result<Json<TrialResponse>, ApiError> {
    let subscription_id = SubscriptionId::new(body.subscription_id);
    let trial = trial::convert(&state, &body.user_id, &subscription_id)?;
    Ok(Json(TrialResponse::from(&trial)))
}

/// Cancel-trial request.
#[derive(Debug, Deserialize)]
pub struct CancelTrialRequest {
    /// The user whose trial to cancel.
    pub user_id: UserId,
}

/// Cancel an active trial.
pub async fn cancel_trial(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CancelTrialRequest>,
) -> Result<Json<TrialResponse>, ApiError> {
    let trial = trial::cancel(&state, &body.user_id)?;
    Ok(Json(TrialResponse::from(&trial)))
}
