//! Coupon handlers.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{Coupon, CouponType, UserId};

use crate::error::ApiError;
use crate::state::AppState;

/// Default validity window for coupons created without explicit dates.
const DEFAULT_VALID_DAYS: i64 = 30;

/// Coupon response.
#[derive(Debug, Serialize)]
pub struct CouponResponse {
    /// Coupon code.
    pub code: String,
    /// Discount kind.
    pub coupon_type: CouponType,
    /// Percent or flat amount, depending on the kind.
    pub value: i64,
    /// Start of the validity window.
    pub valid_from: String,
    /// End of the validity window.
    pub valid_to: String,
    /// Redemption cap, if any.
    pub max_uses: Option<u32>,
    /// Redemptions so far.
    pub current_uses: u32,
    /// Minimum purchase amount, if any.
    pub min_purchase_amount: Option<i64>,
    /// Whether the coupon is active.
    pub is_active: bool,
}

impl From<&Coupon> for CouponResponse {
    fn from(c: &Coupon) -> Self {
        Self {
            code: c.code.clone(),
            coupon_type: c.coupon_type,
            value: c.value,
            valid_from: c.valid_from.to_rfc3339(),
            valid_to: c.valid_to.to_rfc3339(),
            max_uses: c.max_uses,
            current_uses: c.current_uses,
            min_purchase_amount: c.min_purchase_amount,
            is_active: c.is_active,
        }
    }
}

/// Create-coupon request.
#[derive(Debug, Deserialize)]
pub struct CreateCouponRequest {
    /// Unique coupon code.
    pub code: String,
    /// Discount kind.
    pub coupon_type: CouponType,
    /// Percent (0..=100) or flat amount.
    pub value: i64,
    /// Start of the validity window (default now).
    pub valid_from: Option<DateTime<Utc>>,
    /// End of the validity window (default 30 days from start).
    pub valid_to: Option<DateTime<Utc>>,
    /// Redemption cap, if any.
    pub max_uses: Option<u32>,
    /// Minimum purchase amount the coupon applies to, if any.
    pub min_purchase_amount: Option<i64>,
}

/// Create a coupon.
pub async fn create_coupon(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCouponRequest>,
) -> Result<Json<CouponResponse>, ApiError> {
    if body.code.trim().is_empty() {
        return Err(ApiError::BadRequest("Coupon code must not be empty".into()));
    }
    if body.value <= 0 {
        return Err(ApiError::BadRequest("Coupon value must be positive".into()));
    }
    if body.coupon_type == CouponType::Percentage && body.value > 100 {
        return Err(ApiError::BadRequest(
            "Percentage value must be at most 100".into(),
        ));
    }

    if state.store.get_coupon(&body.code)?.is_some() {
        return Err(ApiError::Conflict("Coupon already exists".into()));
    }

    let valid_from = body.valid_from.unwrap_or_else(Utc::now);
    let coupon = Coupon {
        code: body.code,
        coupon_type: body.coupon_type,
        value: body.value,
        valid_from,
        valid_to: body
            .valid_to
            .unwrap_or(valid_from + Duration::days(DEFAULT_VALID_DAYS)),
        max_uses: body.max_uses,
        current_uses: 0,
        used_by: HashSet::new(),
        min_purchase_amount: body.min_purchase_amount,
        is_active: true,
    };
    state.store.put_coupon(&coupon)?;

    tracing::info!(code = %coupon.code, "Coupon created");
    Ok(Json(CouponResponse::from(&coupon)))
}

/// Validate-coupon request.
#[derive(Debug, Deserialize)]
pub struct ValidateCouponRequest {
    /// The code to validate.
    pub code: String,
    /// The user who would redeem it.
    pub user_id: UserId,
    /// Purchase amount the coupon would apply to, when known.
    pub amount: Option<i64>,
}

/// Validation response. Always 200: an invalid coupon is a result, not an
/// error, so callers can show the reason inline.
#[derive(Debug, Serialize)]
pub struct ValidateCouponResponse {
    /// Whether the coupon can be redeemed by this user right now.
    pub valid: bool,
    /// The discount the coupon would grant, when valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<i64>,
    /// The failing rule, when invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Check a coupon's rules without redeeming it.
pub async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ValidateCouponRequest>,
) -> Result<Json<ValidateCouponResponse>, ApiError> {
    let Some(coupon) = state.store.get_coupon(&body.code)? else {
        return Ok(Json(ValidateCouponResponse {
            valid: false,
            discount: None,
            error: Some("coupon not found".into()),
        }));
    };

    let response = match coupon.validate(&body.user_id, body.amount, Utc::now()) {
        Ok(discount) => ValidateCouponResponse {
            valid: true,
            discount: Some(discount),
            error: None,
        },
        Err(err) => ValidateCouponResponse {
            valid: false,
            discount: None,
            error: Some(err.to_string()),
        },
    };
    Ok(Json(response))
}

/// Validate every redemption rule, then redeem atomically.
///
/// The pure validation covers the window, active flag, and minimum purchase;
/// the store's conditional update re-checks exhaustion and prior use under
/// the coupon's lock.
pub(crate) fn redeem_checked(
    state: &AppState,
    code: &str,
    user_id: &UserId,
    amount: Option<i64>,
) -> Result<Coupon, ApiError> {
    let coupon = state
        .store
        .get_coupon(code)?
        .ok_or_else(|| ApiError::NotFound("Coupon not found".into()))?;
    coupon
        .validate(user_id, amount, Utc::now())
        .map_err(ApiError::from)?;

    Ok(state.store.redeem_coupon(code, user_id)?)
}

/// Apply-coupon request.
#[derive(Debug, Deserialize)]
pub struct ApplyCouponRequest {
    /// The code to redeem.
    pub code: String,
    /// The redeeming user.
    pub user_id: UserId,
    /// Purchase amount the coupon applies to, when known.
    pub amount: Option<i64>,
}

/// Redeem a coupon for a user.
///
/// The redemption is a single conditional update in the store, so concurrent
/// requests against a near-exhausted coupon cannot both succeed.
pub async fn apply_coupon(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ApplyCouponRequest>,
) -> Result<Json<CouponResponse>, ApiError> {
    let coupon = redeem_checked(&state, &body.code, &body.user_id, body.amount)?;

    tracing::info!(
        code = %coupon.code,
        user_id = %body.user_id,
        uses = %coupon.current_uses,
        "Coupon redeemed"
    );
    Ok(Json(CouponResponse::from(&coupon)))
}
