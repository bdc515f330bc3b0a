//! Jobs API
//!
//! Status lookup and cancellation for queued deliveries.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use sf_common::JobStatus;

use crate::common::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    let status = state
        .service
        .get_job_status(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Job not found: {}", id)))?;
    Ok(Json(status))
}

/// Cancel a waiting job; active or finished jobs report `cancelled: false`
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let cancelled = state.service.cancel_job(&id).await?;
    Ok(Json(CancelResponse { cancelled }))
}

pub fn jobs_router() -> Router<AppState> {
    Router::new().route("/:id", get(get_job).delete(cancel_job))
}
