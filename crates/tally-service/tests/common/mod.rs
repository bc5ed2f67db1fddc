//! Shared helpers for service integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum_test::{TestResponse, TestServer};
use serde_json::{json, Value};

use tally_core::UserId;
use tally_service::{create_router, crypto, AppState, ServiceConfig};
use tally_store::MemoryStore;

/// Webhook secret used by every test server.
pub const TEST_SECRET: &str = "test-secret";

/// Build app state backed by a fresh in-memory store.
pub fn test_state() -> AppState {
    let config = ServiceConfig {
        webhook_secret: Some(TEST_SECRET.into()),
        ..ServiceConfig::default()
    };
    AppState::new(Arc::new(MemoryStore::new()), config)
}

/// Spin up a test server; the returned state shares the same store.
pub fn setup() -> (TestServer, AppState) {
    let state = test_state();
    let server = TestServer::new(create_router(state.clone())).expect("router builds");
    (server, state)
}

/// Sign a body the way the provider does.
pub fn sign(body: &str) -> String {
    crypto::hmac_sha256_hex(TEST_SECRET, body)
}

/// Deliver a webhook payload with a valid signature.
pub async fn deliver(server: &TestServer, payload: &Value) -> TestResponse {
    let body = payload.to_string();
    let signature = sign(&body);
    server
        .post("/webhooks/provider")
        .add_header(
            HeaderName::from_static("x-provider-signature"),
            HeaderValue::from_str(&signature).expect("hex signature is a valid header"),
        )
        .text(body)
        .await
}

/// A subscription lifecycle event as the provider would send it.
pub fn subscription_event(
    event_id: &str,
    event_type: &str,
    subscription_id: &str,
    user_id: UserId,
    status: &str,
    period_end: i64,
) -> Value {
    json!({
        "id": event_id,
        "type": event_type,
        "data": {
            "id": subscription_id,
            "customer": user_id.to_string(),
            "status": status,
            "plan_id": "pro",
            "billing_cycle": "monthly",
            "current_period_end": period_end,
        }
    })
}

/// A paid checkout completion event.
pub fn checkout_event(event_id: &str, session_id: &str, user_id: UserId, amount: i64) -> Value {
    json!({
        "id": event_id,
        "type": "checkout_completed",
        "data": {
            "id": session_id,
            "payment_status": "paid",
            "client_reference_id": user_id.to_string(),
            "amount_total": amount,
        }
    })
}

/// An invoice payment event.
pub fn invoice_event(event_id: &str, event_type: &str, user_id: UserId, amount: i64) -> Value {
    json!({
        "id": event_id,
        "type": event_type,
        "data": {
            "customer": user_id.to_string(),
            "amount_due": amount,
        }
    })
}
