//! Provider webhook handler.
//!
//! The body is taken as a raw string because the signature covers the exact
//! bytes the provider sent; parsing happens after verification in ingress.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use crate::error::ApiError;
use crate::ingress::{self, IngressOutcome};
use crate::state::AppState;

/// Signature header the provider sets on every delivery.
pub const SIGNATURE_HEADER: &str = "x-provider-signature";

/// Handle one webhook delivery from the billing provider.
pub async fn provider_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let status = match ingress::receive(&state, &body, signature).await? {
        IngressOutcome::Accepted => "accepted",
        IngressOutcome::Duplicate => "duplicate",
    };

    Ok(Json(serde_json::json!({ "status": status })))
}
