//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{checkout, coupons, credits, fraud, health, trials, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Credits
/// - `GET /v1/credits/balance/:user_id` - Get a user's balance
/// - `GET /v1/credits/transactions/:user_id` - List transaction history
/// - `POST /v1/credits/debit` - Debit credits for usage
/// - `POST /v1/credits/add` - Grant bonus credits
///
/// ## Trials
/// - `POST /v1/trials/start` - Start a trial
/// - `GET /v1/trials/:user_id` - Get a user's trial
/// - `POST /v1/trials/extend` - Extend a trial window
/// - `POST /v1/trials/convert` - Mark a trial converted
/// - `POST /v1/trials/cancel` - Cancel a trial
///
/// ## Coupons
/// - `POST /v1/coupons` - Create a coupon
/// - `POST /v1/coupons/validate` - Check a coupon without redeeming
/// - `POST /v1/coupons/apply` - Redeem a coupon
///
/// ## Checkout and fraud
/// - `POST /v1/checkout` - Price a checkout order
/// - `GET /v1/fraud/alerts` - List alerts pending review
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/provider` - Billing provider events
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let api_routes = Router::new()
        // Credits
        .route("/credits/balance/:user_id", get(credits::get_balance))
        .route(
            "/credits/transactions/:user_id",
            get(credits::list_transactions),
        )
        .route("/credits/debit", post(credits::debit_credits))
        .route("/credits/add", post(credits::add_credits))
        // Trials
        .route("/trials/start", post(trials::start_trial))
        .route("/trials/extend", post(trials::extend_trial))
        .route("/trials/convert", post(trials::convert_trial))
        .route("/trials/cancel", post(trials::cancel_trial))
        .route("/trials/:user_id", get(trials::get_trial))
        // Coupons
        .route("/coupons", post(coupons::create_coupon))
        .route("/coupons/validate", post(coupons::validate_coupon))
        .route("/coupons/apply", post(coupons::apply_coupon))
        // Checkout
        .route("/checkout", post(checkout::create_checkout))
        // Fraud review
        .route("/fraud/alerts", get(fraud::list_alerts))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - delivery volume is controlled by the provider)
        .route("/webhooks/provider", post(webhooks::provider_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
