// SPDX-License-Identifier: GPL-3.0-or-later
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use fetcharr_domain::{Notification, StatisticsSummary};
use fetcharr_infrastructure::repositories::{NotificationRepository, StatisticsRepository};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error;
use crate::ApiState;

#[derive(Debug, Serialize, ToSchema)]
pub struct StatisticsResponse {
    pub total_movies: u64,
    pub total_shows: u64,
    pub total_episodes: u64,
    pub collected_movies: u64,
    pub collected_episodes: u64,
    pub upgraded_items: u64,
    pub latest_collected_at: Option<DateTime<Utc>>,
    pub latest_upgraded_at: Option<DateTime<Utc>>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl From<StatisticsSummary> for StatisticsResponse {
    fn from(summary: StatisticsSummary) -> Self {
        Self {
            total_movies: summary.total_movies,
            total_shows: summary.total_shows,
            total_episodes: summary.total_episodes,
            collected_movies: summary.collected_movies,
            collected_episodes: summary.collected_episodes,
            upgraded_items: summary.upgraded_items,
            latest_collected_at: summary.latest_collected_at,
            latest_upgraded_at: summary.latest_upgraded_at,
            refreshed_at: summary.refreshed_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationResponse {
    pub id: String,
    pub item_id: String,
    pub title: String,
    pub from_state: String,
    pub to_state: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl From<Notification> for NotificationResponse {
    fn from(notification: Notification) -> Self {
        Self {
            id: notification.id.to_string(),
            item_id: notification.item_id.to_string(),
            title: notification.title,
            from_state: notification.from_state.as_str().to_string(),
            to_state: notification.to_state.as_str().to_string(),
            created_at: notification.created_at,
            sent_at: notification.sent_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NotificationsQuery {
    pub limit: Option<i64>,
}

/// Current statistics snapshot.
#[utoipa::path(
    get,
    path = "/api/v1/statistics",
    responses(
        (status = 200, description = "Statistics", body = StatisticsResponse)
    ),
    tag = "stats"
)]
pub async fn get_statistics(State(state): State<ApiState>) -> impl IntoResponse {
    match state.statistics.get().await {
        Ok(summary) => Json(StatisticsResponse::from(summary)).into_response(),
        Err(err) => error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Pending (unsent) notifications.
#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    params(("limit" = Option<i64>, Query, description = "Page size, default 50")),
    responses(
        (status = 200, description = "Pending notifications", body = [NotificationResponse])
    ),
    tag = "stats"
)]
pub async fn list_notifications(
    State(state): State<ApiState>,
    Query(query): Query<NotificationsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    match state.notifications.list_unsent(limit).await {
        Ok(pending) => {
            let body: Vec<NotificationResponse> = pending
                .into_iter()
                .map(NotificationResponse::from)
                .collect();
            Json(body).into_response()
        }
        Err(err) => error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
