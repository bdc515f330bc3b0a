//! Deliveries API
//!
//! Read-only view of the outcome log.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sf_common::{DeliveryStats, EventKind, OutcomeFilter, OutcomeRecord, ResponseSnapshot};

use crate::common::{default_limit, default_page, ApiResult, PaginatedResponse};
use crate::AppState;

/// Outcome record response DTO
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    pub id: String,
    pub job_id: String,
    pub delivery_id: String,
    pub subscription_id: String,
    pub event: EventKind,
    pub order_id: String,
    pub attempt: u32,
    pub response: ResponseSnapshot,
    pub payload: serde_json::Value,
    pub created_at: String,
}

impl From<OutcomeRecord> for DeliveryResponse {
    fn from(r: OutcomeRecord) -> Self {
        Self {
            order_id: r.payload.order_id().to_string(),
            payload: serde_json::to_value(&r.payload).unwrap_or(serde_json::Value::Null),
            id: r.id,
            job_id: r.job_id,
            delivery_id: r.delivery_id,
            subscription_id: r.subscription_id,
            event: r.event,
            attempt: r.attempt,
            response: r.response,
            created_at: r.created_at.to_rfc3339(),
        }
    }
}

/// Query parameters for the deliveries list
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveriesQuery {
    pub subscription_id: Option<String>,
    pub event: Option<EventKind>,
    pub success: Option<bool>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub subscription_id: Option<String>,
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    query: Result<Query<DeliveriesQuery>, QueryRejection>,
) -> ApiResult<Json<PaginatedResponse<DeliveryResponse>>> {
    let Query(query) = query?;
    let filter = OutcomeFilter {
        subscription_id: query.subscription_id,
        event: query.event,
        success: query.success,
    };

    let page = state.service.list_outcomes(filter, query.page, query.limit).await?;
    Ok(Json(PaginatedResponse::new(
        page.records.into_iter().map(Into::into).collect(),
        page.page,
        page.limit,
        page.total,
    )))
}

pub async fn delivery_stats(
    State(state): State<AppState>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> ApiResult<Json<DeliveryStats>> {
    let Query(query) = query?;
    let stats = state
        .service
        .delivery_stats(query.subscription_id.as_deref())
        .await?;
    Ok(Json(stats))
}

pub fn deliveries_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_deliveries))
        .route("/stats", get(delivery_stats))
}
