// SPDX-License-Identifier: GPL-3.0-or-later
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use fetcharr_domain::{ItemId, ItemState, MediaItem};
use fetcharr_infrastructure::repositories::{MediaItemRepository, Repository};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{error, ErrorResponse};
use crate::ApiState;

#[derive(Debug, Serialize, ToSchema)]
pub struct ItemResponse {
    pub id: String,
    pub title: String,
    pub media_type: String,
    pub state: String,
    pub version: String,
    pub year: Option<i32>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub filled_by_file: Option<String>,
    pub current_score: Option<i32>,
    pub wake_count: u32,
    pub last_updated: DateTime<Utc>,
}

impl From<MediaItem> for ItemResponse {
    fn from(item: MediaItem) -> Self {
        Self {
            id: item.id.to_string(),
            title: item.title,
            media_type: item.media_type.to_string(),
            state: item.state.as_str().to_string(),
            version: item.version.0,
            year: item.year,
            season: item.season,
            episode: item.episode,
            filled_by_file: item.filled_by_file,
            current_score: item.current_score,
            wake_count: item.wake_count,
            last_updated: item.last_updated,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QueueDepthResponse {
    pub state: String,
    pub depth: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListItemsQuery {
    pub state: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TransitionRequest {
    pub to_state: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransitionResponse {
    pub applied: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpgradeCheckResponse {
    pub promoted: usize,
}

fn parse_item_id(raw: &str) -> Result<ItemId, (StatusCode, Json<super::ErrorResponse>)> {
    Uuid::parse_str(raw)
        .map(ItemId::from_uuid)
        .map_err(|_| error(StatusCode::BAD_REQUEST, "invalid item id"))
}

/// In-memory queue depths per state.
#[utoipa::path(
    get,
    path = "/api/v1/queues",
    responses(
        (status = 200, description = "Queue depths", body = [QueueDepthResponse])
    ),
    tag = "items"
)]
pub async fn list_queues(State(state): State<ApiState>) -> Json<Vec<QueueDepthResponse>> {
    let depths = state
        .pipeline
        .queues()
        .depths()
        .into_iter()
        .map(|(queue_state, depth)| QueueDepthResponse {
            state: queue_state.as_str().to_string(),
            depth,
        })
        .collect();
    Json(depths)
}

/// List items, optionally filtered by state.
#[utoipa::path(
    get,
    path = "/api/v1/items",
    params(
        ("state" = Option<String>, Query, description = "Filter by item state"),
        ("limit" = Option<i64>, Query, description = "Page size, default 50"),
        ("offset" = Option<i64>, Query, description = "Page offset")
    ),
    responses(
        (status = 200, description = "Items", body = [ItemResponse]),
        (status = 400, description = "Unknown state", body = ErrorResponse)
    ),
    tag = "items"
)]
pub async fn list_items(
    State(state): State<ApiState>,
    Query(query): Query<ListItemsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let items = match &query.state {
        Some(raw) => {
            let Some(item_state) = ItemState::parse(raw) else {
                return error(StatusCode::BAD_REQUEST, format!("unknown state: {raw}"))
                    .into_response();
            };
            state.items.list_by_state(item_state, limit, offset).await
        }
        None => state.items.list(limit, offset).await,
    };

    match items {
        Ok(items) => {
            let body: Vec<ItemResponse> = items.into_iter().map(ItemResponse::from).collect();
            Json(body).into_response()
        }
        Err(err) => error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Fetch a single item.
#[utoipa::path(
    get,
    path = "/api/v1/items/{id}",
    params(("id" = String, Path, description = "Item id")),
    responses(
        (status = 200, description = "Item", body = ItemResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "items"
)]
pub async fn get_item(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let item_id = match parse_item_id(&id) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    match state.items.get_by_id(item_id.to_string()).await {
        Ok(Some(item)) => Json(ItemResponse::from(item)).into_response(),
        Ok(None) => error(StatusCode::NOT_FOUND, "item not found").into_response(),
        Err(err) => error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn admin_transition(
    state: &ApiState,
    id: &str,
    to_state: ItemState,
) -> axum::response::Response {
    let item_id = match parse_item_id(id) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    match state.pipeline.admin_transition(item_id, to_state).await {
        Ok(applied) => {
            if applied {
                info!(target: "api", item_id = %item_id, to = to_state.as_str(), "admin transition applied");
            }
            Json(TransitionResponse { applied }).into_response()
        }
        Err(err) => error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Move an item to another state. Only resets to `wanted` and forced
/// blacklists are accepted.
#[utoipa::path(
    post,
    path = "/api/v1/items/{id}/transition",
    params(("id" = String, Path, description = "Item id")),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Transition outcome", body = TransitionResponse),
        (status = 400, description = "Invalid target state", body = ErrorResponse)
    ),
    tag = "items"
)]
pub async fn transition_item(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<TransitionRequest>,
) -> impl IntoResponse {
    let Some(to_state) = ItemState::parse(&request.to_state) else {
        return error(
            StatusCode::BAD_REQUEST,
            format!("unknown state: {}", request.to_state),
        )
        .into_response();
    };
    if !matches!(to_state, ItemState::Wanted | ItemState::Blacklisted) {
        return error(
            StatusCode::BAD_REQUEST,
            "only wanted and blacklisted are valid admin targets",
        )
        .into_response();
    }
    admin_transition(&state, &id, to_state).await
}

/// Reset an item to `wanted`, clearing its fulfillment.
#[utoipa::path(
    post,
    path = "/api/v1/items/{id}/reset",
    params(("id" = String, Path, description = "Item id")),
    responses(
        (status = 200, description = "Transition outcome", body = TransitionResponse)
    ),
    tag = "items"
)]
pub async fn reset_item(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    admin_transition(&state, &id, ItemState::Wanted).await
}

/// Force an item onto the blacklist.
#[utoipa::path(
    post,
    path = "/api/v1/items/{id}/blacklist",
    params(("id" = String, Path, description = "Item id")),
    responses(
        (status = 200, description = "Transition outcome", body = TransitionResponse)
    ),
    tag = "items"
)]
pub async fn blacklist_item(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    admin_transition(&state, &id, ItemState::Blacklisted).await
}

/// Lift a blacklist; the item re-enters the pipeline as `wanted`.
#[utoipa::path(
    post,
    path = "/api/v1/items/{id}/unblacklist",
    params(("id" = String, Path, description = "Item id")),
    responses(
        (status = 200, description = "Transition outcome", body = TransitionResponse)
    ),
    tag = "items"
)]
pub async fn unblacklist_item(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    admin_transition(&state, &id, ItemState::Wanted).await
}

/// Push an item back through scraping regardless of where it sits.
#[utoipa::path(
    post,
    path = "/api/v1/items/{id}/rescrape",
    params(("id" = String, Path, description = "Item id")),
    responses(
        (status = 200, description = "Transition outcome", body = TransitionResponse)
    ),
    tag = "items"
)]
pub async fn rescrape_item(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let item_id = match parse_item_id(&id) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    match state.pipeline.rescrape(item_id).await {
        Ok(applied) => Json(TransitionResponse { applied }).into_response(),
        Err(err) => error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Purge an item and its attempt log.
#[utoipa::path(
    delete,
    path = "/api/v1/items/{id}",
    params(("id" = String, Path, description = "Item id")),
    responses(
        (status = 204, description = "Item purged"),
        (status = 400, description = "Invalid id", body = ErrorResponse)
    ),
    tag = "items"
)]
pub async fn purge_item(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let item_id = match parse_item_id(&id) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    match state.items.delete(item_id.to_string()).await {
        Ok(()) => {
            state.pipeline.queues().remove(item_id);
            info!(target: "api", item_id = %item_id, "item purged");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Run an immediate upgrade sweep over collected items.
#[utoipa::path(
    post,
    path = "/api/v1/upgrades/check",
    responses(
        (status = 200, description = "Sweep result", body = UpgradeCheckResponse)
    ),
    tag = "items"
)]
pub async fn upgrade_check(State(state): State<ApiState>) -> impl IntoResponse {
    match state.pipeline.upgrade_sweep().await {
        Ok(promoted) => Json(UpgradeCheckResponse { promoted }).into_response(),
        Err(err) => error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
