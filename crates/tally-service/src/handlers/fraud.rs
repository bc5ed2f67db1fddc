//! Fraud review handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use tally_core::FraudAlert;

use crate::error::ApiError;
use crate::state::AppState;

/// Alert response.
#[derive(Debug, Serialize)]
pub struct AlertResponse {
    /// Alert id.
    pub alert_id: String,
    /// The flagged user.
    pub user_id: String,
    /// Score at evaluation time.
    pub risk_score: u32,
    /// Flags of the rules that fired.
    pub flags: Vec<String>,
    /// When the alert was created.
    pub created_at: String,
}

impl From<&FraudAlert> for AlertResponse {
    fn from(alert: &FraudAlert) -> Self {
        Self {
            alert_id: alert.id.to_string(),
            user_id: alert.user_id.to_string(),
            risk_score: alert.risk_score,
            flags: alert.flags.clone(),
            created_at: alert.created_at.to_rfc3339(),
        }
    }
}

/// List alerts waiting for human review.
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let alerts: Vec<AlertResponse> = state
        .store
        .list_pending_alerts()?
        .iter()
        .map(AlertResponse::from)
        .collect();

    Ok(Json(serde_json::json!({ "alerts": alerts })))
}
