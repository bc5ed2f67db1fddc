//! Checkout handler.
//!
//! Prices an order for a credit purchase or plan: the fraud gate runs first,
//! then the coupon (if any) is validated against the gross amount. Nothing is
//! posted to the ledger here; credits land when the provider's
//! `checkout_completed` webhook arrives carrying the session id minted below.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use tally_core::UserId;

use crate::error::ApiError;
use crate::gate::{self, RequestSignals};
use crate::state::AppState;

/// Checkout request.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// The purchasing user.
    pub user_id: UserId,
    /// Plan to subscribe to. When set, the amount comes from the catalog.
    pub plan_id: Option<String>,
    /// Explicit purchase amount, for one-off credit purchases.
    pub amount: Option<i64>,
    /// Credits the purchase grants (defaults to the amount).
    pub credits_amount: Option<i64>,
    /// Coupon to apply, if any.
    pub coupon_code: Option<String>,
    /// Payment method descriptor, when known.
    pub payment_method: Option<String>,
    /// Billing country code, when known.
    pub billing_country: Option<String>,
    /// Request IP address, when forwarded by the caller.
    pub ip: Option<String>,
    /// Request user agent, when forwarded by the caller.
    pub user_agent: Option<String>,
    /// Account age in hours, when the caller knows it.
    pub account_age_hours: Option<i64>,
}

/// A priced order, ready to hand to the payment provider.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// Session id the provider's completion webhook will reference.
    pub session_id: String,
    /// The purchasing user.
    pub user_id: String,
    /// Gross amount before discount.
    pub amount: i64,
    /// Discount applied by the coupon, zero without one.
    pub discount: i64,
    /// Amount actually due.
    pub total: i64,
    /// Credits the purchase will grant on completion.
    pub credits_amount: i64,
    /// Coupon carried on the order, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    /// Risk band the gate assigned.
    pub risk_level: tally_core::RiskLevel,
}

/// Price a checkout order.
pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let amount = match (&body.plan_id, body.amount) {
        (Some(plan_id), _) => {
            state
                .config
                .plans
                .plan(plan_id)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown plan: {plan_id}")))?
                .price
        }
        (None, Some(amount)) => amount,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "Either plan_id or amount is required".into(),
            ))
        }
    };
    if amount <= 0 {
        return Err(ApiError::BadRequest("Amount must be positive".into()));
    }

    let signals = RequestSignals {
        payment_method: body.payment_method.clone(),
        billing_country: body.billing_country.clone(),
        ip: body.ip.clone(),
        user_agent: body.user_agent.clone(),
        account_age_hours: body.account_age_hours,
    };
    let report = gate::assess(&state, body.user_id, amount, &signals)?;

    // Validation only. The redemption itself happens when the provider
    // confirms payment, so an abandoned session never burns a use.
    let discount = match &body.coupon_code {
        Some(code) => {
            let coupon = state
                .store
                .get_coupon(code)?
                .ok_or_else(|| ApiError::NotFound("Coupon not found".into()))?;
            coupon
                .validate(&body.user_id, Some(amount), Utc::now())
                .map_err(ApiError::from)?
        }
        None => 0,
    };
    let total = (amount - discount).max(0);

    let session_id = format!("chk_{}", uuid::Uuid::new_v4().simple());
    tracing::info!(
        user_id = %body.user_id,
        session_id = %session_id,
        amount = %amount,
        discount = %discount,
        risk_level = ?report.risk_level,
        "Checkout session priced"
    );

    Ok(Json(CheckoutResponse {
        session_id,
        user_id: body.user_id.to_string(),
        amount,
        discount,
        total,
        credits_amount: body.credits_amount.unwrap_or(amount),
        coupon_code: body.coupon_code,
        risk_level: report.risk_level,
    }))
}
