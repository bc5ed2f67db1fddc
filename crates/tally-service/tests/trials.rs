//! Trial lifecycle integration tests.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use tally_core::{TrialStatus, UserId, DEFAULT_TRIAL_CREDITS};

use common::setup;

#[tokio::test]
async fn starting_a_trial_grants_credits() {
    let (server, state) = setup();
    let user = UserId::generate();

    let response = server
        .post("/v1/trials/start")
        .json(&json!({ "user_id": user.to_string(), "plan_id": "pro" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "active");
    assert_eq!(body["credits_limit"], DEFAULT_TRIAL_CREDITS);
    assert_eq!(body["credits_remaining"], DEFAULT_TRIAL_CREDITS);

    assert_eq!(
        state.store.get_balance(&user).unwrap().current_balance,
        DEFAULT_TRIAL_CREDITS
    );
}

#[tokio::test]
async fn one_trial_per_user_lifetime() {
    let (server, _state) = setup();
    let user = UserId::generate();

    server
        .post("/v1/trials/start")
        .json(&json!({ "user_id": user.to_string() }))
        .await;

    let second = server
        .post("/v1/trials/start")
        .json(&json!({ "user_id": user.to_string() }))
        .await;
    assert_eq!(second.status_code(), StatusCode::CONFLICT);

    // Cancelling doesn't reopen eligibility.
    server
        .post("/v1/trials/cancel")
        .json(&json!({ "user_id": user.to_string() }))
        .await;
    let third = server
        .post("/v1/trials/start")
        .json(&json!({ "user_id": user.to_string() }))
        .await;
    assert_eq!(third.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn get_trial_404_when_absent() {
    let (server, _state) = setup();
    let user = UserId::generate();

    let response = server.get(&format!("/v1/trials/{user}")).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn debit_during_trial_counts_against_the_cap() {
    let (server, state) = setup();
    let user = UserId::generate();

    server
        .post("/v1/trials/start")
        .json(&json!({ "user_id": user.to_string() }))
        .await;

    let debit = server
        .post("/v1/credits/debit")
        .json(&json!({ "user_id": user.to_string(), "amount": 100 }))
        .await;
    assert_eq!(debit.status_code(), StatusCode::OK);

    let trial = state.store.get_trial(&user).unwrap().unwrap();
    assert_eq!(trial.credits_used, 100);
    assert_eq!(
        state.store.get_balance(&user).unwrap().current_balance,
        DEFAULT_TRIAL_CREDITS - 100
    );
}

#[tokio::test]
async fn replayed_debit_does_not_double_count_the_trial_cap() {
    let (server, state) = setup();
    let user = UserId::generate();

    server
        .post("/v1/trials/start")
        .json(&json!({ "user_id": user.to_string() }))
        .await;

    let request = json!({
        "user_id": user.to_string(),
        "amount": 100,
        "related_type": "feature_run",
        "related_id": "run_1"
    });
    let first = server.post("/v1/credits/debit").json(&request).await;
    assert_eq!(first.status_code(), StatusCode::OK);

    // The client retries the same debit; the ledger rejects the duplicate
    // and the trial cap must stay where the first debit left it.
    let replay = server.post("/v1/credits/debit").json(&request).await;
    assert_eq!(replay.status_code(), StatusCode::CONFLICT);

    let trial = state.store.get_trial(&user).unwrap().unwrap();
    assert_eq!(trial.credits_used, 100);
    assert_eq!(
        state.store.get_balance(&user).unwrap().current_balance,
        DEFAULT_TRIAL_CREDITS - 100
    );
}

#[tokio::test]
async fn trial_cap_blocks_even_with_ledger_balance() {
    let (server, _state) = setup();
    let user = UserId::generate();

    server
        .post("/v1/trials/start")
        .json(&json!({ "user_id": user.to_string() }))
        .await;
    // Top the ledger up beyond the trial cap.
    server
        .post("/v1/credits/add")
        .json(&json!({ "user_id": user.to_string(), "amount": 1_000 }))
        .await;

    let debit = server
        .post("/v1/credits/debit")
        .json(&json!({ "user_id": user.to_string(), "amount": DEFAULT_TRIAL_CREDITS + 100 }))
        .await;

    assert_eq!(debit.status_code(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn convert_then_cancel_conflicts() {
    let (server, state) = setup();
    let user = UserId::generate();

    server
        .post("/v1/trials/start")
        .json(&json!({ "user_id": user.to_string() }))
        .await;

    let convert = server
        .post("/v1/trials/convert")
        .json(&json!({ "user_id": user.to_string(), "subscription_id": "sub_77" }))
        .await;
    assert_eq!(convert.status_code(), StatusCode::OK);
    assert_eq!(convert.json::<Value>()["status"], "converted");
    assert_eq!(
        state.store.get_trial(&user).unwrap().unwrap().status,
        TrialStatus::Converted
    );

    let cancel = server
        .post("/v1/trials/cancel")
        .json(&json!({ "user_id": user.to_string() }))
        .await;
    assert_eq!(cancel.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn extend_pushes_the_window_forward() {
    let (server, state) = setup();
    let user = UserId::generate();

    server
        .post("/v1/trials/start")
        .json(&json!({ "user_id": user.to_string() }))
        .await;
    let before = state.store.get_trial(&user).unwrap().unwrap().end_date;

    let response = server
        .post("/v1/trials/extend")
        .json(&json!({ "user_id": user.to_string(), "extension_days": 7 }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let after = state.store.get_trial(&user).unwrap().unwrap().end_date;
    assert_eq!(after - before, chrono::Duration::days(7));
}

#[tokio::test]
async fn extend_rejects_non_positive_days() {
    let (server, _state) = setup();
    let user = UserId::generate();

    server
        .post("/v1/trials/start")
        .json(&json!({ "user_id": user.to_string() }))
        .await;

    let response = server
        .post("/v1/trials/extend")
        .json(&json!({ "user_id": user.to_string(), "extension_days": 0 }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn expiry_sweep_flips_status_but_keeps_credits() {
    let (server, state) = setup();
    let user = UserId::generate();

    server
        .post("/v1/trials/start")
        .json(&json!({ "user_id": user.to_string() }))
        .await;

    // Sweep as if the window had closed.
    let cutoff = chrono::Utc::now() + chrono::Duration::days(30);
    let expired = state.store.expire_trials(cutoff).unwrap();
    assert_eq!(expired, 1);

    let trial = state.store.get_trial(&user).unwrap().unwrap();
    assert_eq!(trial.status, TrialStatus::Expired);
    // Expiry never claws back the granted credits.
    assert_eq!(
        state.store.get_balance(&user).unwrap().current_balance,
        DEFAULT_TRIAL_CREDITS
    );

    // Second sweep finds nothing.
    assert_eq!(state.store.expire_trials(cutoff).unwrap(), 0);
}
