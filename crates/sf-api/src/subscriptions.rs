//! Subscriptions Admin API
//!
//! Secrets are write-only: responses only say whether one is set.

use std::collections::{BTreeMap, BTreeSet};

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sf_common::{EventKind, Subscription};
use sf_dispatch::SubscriptionInput;

use crate::common::{ApiError, ApiResult, SuccessResponse};
use crate::AppState;

/// Subscription response DTO
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub id: String,
    pub name: String,
    pub url: String,
    pub has_secret: bool,
    pub active: bool,
    pub events: BTreeSet<EventKind>,
    pub headers: BTreeMap<String, String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(s: Subscription) -> Self {
        Self {
            id: s.id,
            name: s.name,
            url: s.url,
            has_secret: s.secret.is_some(),
            active: s.active,
            events: s.events,
            headers: s.headers,
            created_at: s.created_at.to_rfc3339(),
            updated_at: s.updated_at.to_rfc3339(),
            deleted_at: s.deleted_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionsQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    query: Result<Query<SubscriptionsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<SubscriptionResponse>>> {
    let Query(query) = query?;
    let subscriptions = state.service.list_subscriptions(query.include_deleted).await?;
    Ok(Json(subscriptions.into_iter().map(Into::into).collect()))
}

pub async fn create_subscription(
    State(state): State<AppState>,
    input: Result<Json<SubscriptionInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubscriptionResponse>)> {
    let Json(input) = input?;
    let subscription = state.service.create_subscription(input).await?;
    Ok((StatusCode::CREATED, Json(subscription.into())))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = state
        .service
        .get_subscription(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Subscription not found: {}", id)))?;
    Ok(Json(subscription.into()))
}

/// Full replacement; an omitted secret removes signing
pub async fn update_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    input: Result<Json<SubscriptionInput>, JsonRejection>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let Json(input) = input?;
    let subscription = state.service.update_subscription(&id, input).await?;
    Ok(Json(subscription.into()))
}

pub async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    state.service.delete_subscription(&id).await?;
    Ok(Json(SuccessResponse::ok()))
}

pub fn subscriptions_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_subscriptions).post(create_subscription))
        .route(
            "/:id",
            get(get_subscription)
                .put(update_subscription)
                .delete(delete_subscription),
        )
}
