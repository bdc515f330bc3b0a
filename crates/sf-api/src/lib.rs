//! Storefront Webhooks API
//!
//! Administrative HTTP endpoints for:
//! - Event dispatch
//! - Job status and cancellation
//! - Subscription management
//! - Delivery history and statistics
//! - Health

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use sf_dispatch::WebhookService;

pub mod common;
pub mod deliveries;
pub mod events;
pub mod jobs;
pub mod subscriptions;

pub use common::{ApiError, ApiResult, PaginatedResponse};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WebhookService>,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `UP` while the process serves requests
    pub status: String,
    pub version: String,
    /// Active queue strategy
    pub backend: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.service.backend_name().to_string(),
    })
}

/// Build the API router. Middleware layers are left to the caller.
pub fn create_router(service: Arc<WebhookService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/health", get(health))
        .nest("/api/events", events::events_router())
        .nest("/api/jobs", jobs::jobs_router())
        .nest("/api/subscriptions", subscriptions::subscriptions_router())
        .nest("/api/deliveries", deliveries::deliveries_router())
        .with_state(state)
}
