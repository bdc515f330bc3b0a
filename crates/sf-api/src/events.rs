//! Events API
//!
//! Accepts a complete webhook payload and fans it out to subscribers.

use std::time::Duration;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sf_common::{JobId, QueueOptions, WebhookPayload};

use crate::common::ApiResult;
use crate::AppState;

/// Optional queue overrides for a dispatch
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchQuery {
    pub delay_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

impl DispatchQuery {
    fn options(&self) -> Option<QueueOptions> {
        if self.delay_ms.is_none() && self.max_attempts.is_none() {
            return None;
        }
        Some(QueueOptions {
            delay: self.delay_ms.map(Duration::from_millis),
            max_attempts: self.max_attempts,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub event: String,
    pub job_ids: Vec<JobId>,
}

/// Dispatch an event to every active subscriber
pub async fn dispatch_event(
    State(state): State<AppState>,
    query: Result<Query<DispatchQuery>, QueryRejection>,
    payload: Result<Json<WebhookPayload>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DispatchResponse>)> {
    let Query(query) = query?;
    let Json(payload) = payload?;
    let event = payload.event().to_string();

    let job_ids = state.service.dispatch_event(payload, query.options()).await?;
    Ok((StatusCode::ACCEPTED, Json(DispatchResponse { event, job_ids })))
}

pub fn events_router() -> Router<AppState> {
    Router::new().route("/", post(dispatch_event))
}
