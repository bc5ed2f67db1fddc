//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use tally_core::LedgerError;
use tally_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists or invalid state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient credits.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// Fraud gate blocked the transaction.
    #[error("transaction blocked (risk score {risk_score})")]
    FraudBlocked {
        /// The score that triggered the block.
        risk_score: u32,
    },

    /// A webhook event handler failed; the provider should retry.
    #[error("event processing failed: {message}")]
    WebhookFailed {
        /// The provider event id, returned so retries can be correlated.
        event_id: String,
        /// What went wrong.
        message: String,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientCredits { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required
                })),
            ),
            Self::FraudBlocked { risk_score } => (
                StatusCode::FORBIDDEN,
                "fraud_blocked",
                self.to_string(),
                Some(serde_json::json!({ "risk_score": risk_score })),
            ),
            Self::WebhookFailed { event_id, message } => {
                tracing::error!(event_id = %event_id, error = %message, "Event processing failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "event_processing_failed",
                    format!("Event {event_id} failed, please retry"),
                    Some(serde_json::json!({ "event_id": event_id })),
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            LedgerError::TrialCreditsExceeded { used, limit, requested } => {
                Self::InsufficientCredits {
                    balance: limit - used,
                    required: requested,
                }
            }
            LedgerError::FraudBlocked { risk_score } => Self::FraudBlocked { risk_score },
            LedgerError::TrialNotFound { .. } => Self::NotFound(err.to_string()),
            LedgerError::DuplicatePosting { .. }
            | LedgerError::TrialAlreadyExists { .. }
            | LedgerError::TrialNotActive { .. }
            | LedgerError::CouponExhausted
            | LedgerError::CouponAlreadyUsed => Self::Conflict(err.to_string()),
            LedgerError::CouponInvalid(_)
            | LedgerError::CouponExpired
            | LedgerError::InvalidAmount(_)
            | LedgerError::InvalidId(_) => Self::BadRequest(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Ledger(inner) => inner.into(),
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_map_to_statuses() {
        let err: ApiError = LedgerError::InsufficientBalance {
            balance: 5,
            required: 10,
        }
        .into();
        assert!(matches!(
            err,
            ApiError::InsufficientCredits {
                balance: 5,
                required: 10
            }
        ));

        let err: ApiError = LedgerError::CouponExhausted.into();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err: ApiError = LedgerError::FraudBlocked { risk_score: 85 }.into();
        assert!(matches!(err, ApiError::FraudBlocked { risk_score: 85 }));
    }

    #[test]
    fn store_not_found_maps_to_404() {
        let err: ApiError = StoreError::NotFound {
            entity: "coupon",
            id: "NOPE".into(),
        }
        .into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
