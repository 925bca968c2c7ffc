//! Merchant-facing HTTP surface
//!
//! `/v1` endpoints are authenticated with the merchant's API key in the
//! `X-API-Key` header. `/admin` endpoints are expected to sit behind the
//! deployment's admin perimeter.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::IntentService;
use crate::store::IntentStore;

pub mod admin;
pub mod intents;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub intent_service: Arc<IntentService>,
    pub store: Arc<dyn IntentStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/intents", post(intents::create_intent))
        .route("/v1/intents/{intent_id}", get(intents::get_intent))
        .route(
            "/admin/merchants",
            post(admin::create_merchant).get(admin::list_merchants),
        )
        .route("/admin/intents/pending", get(admin::pending_intents))
        .route("/health", get(admin::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}
