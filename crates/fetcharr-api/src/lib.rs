// SPDX-License-Identifier: GPL-3.0-or-later
pub mod handlers;

use axum::{
    routing::{get, post},
    Json, Router,
};
use fetcharr_application::events::ChannelEventBus;
use fetcharr_application::Pipeline;
use fetcharr_config::AppConfig;
use fetcharr_infrastructure::sqlite_adapters::{
    SqliteMediaItemRepository, SqliteNotificationRepository, SqliteStatisticsRepository,
};
use fetcharr_scheduler::pause::PauseControl;
use handlers::items::{
    blacklist_item, get_item, list_items, list_queues, purge_item, rescrape_item, reset_item,
    transition_item, unblacklist_item, upgrade_check, ItemResponse, QueueDepthResponse,
    TransitionRequest, TransitionResponse, UpgradeCheckResponse, __path_blacklist_item,
    __path_get_item, __path_list_items, __path_list_queues, __path_purge_item,
    __path_rescrape_item, __path_reset_item, __path_transition_item, __path_unblacklist_item,
    __path_upgrade_check,
};
use handlers::scheduler::{
    pause_scheduler, resume_scheduler, scheduler_state, SchedulerStateResponse,
    __path_pause_scheduler, __path_resume_scheduler, __path_scheduler_state,
};
use handlers::stats::{
    get_statistics, list_notifications, NotificationResponse, StatisticsResponse,
    __path_get_statistics, __path_list_notifications,
};
use handlers::ErrorResponse;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Clone)]
pub struct ApiState {
    pub config: AppConfig,
    pub pipeline: Arc<Pipeline<ChannelEventBus>>,
    pub items: Arc<SqliteMediaItemRepository>,
    pub statistics: Arc<SqliteStatisticsRepository>,
    pub notifications: Arc<SqliteNotificationRepository>,
    pub pause: PauseControl,
}

#[derive(Serialize, utoipa::ToSchema)]
struct HealthResponse {
    status: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
#[allow(dead_code)]
async fn health() -> Json<HealthResponse> {
    health_handler().await
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        list_queues,
        list_items,
        get_item,
        transition_item,
        reset_item,
        blacklist_item,
        unblacklist_item,
        rescrape_item,
        purge_item,
        upgrade_check,
        scheduler_state,
        pause_scheduler,
        resume_scheduler,
        get_statistics,
        list_notifications,
    ),
    components(
        schemas(
            HealthResponse,
            ErrorResponse,
            ItemResponse,
            QueueDepthResponse,
            TransitionRequest,
            TransitionResponse,
            UpgradeCheckResponse,
            SchedulerStateResponse,
            StatisticsResponse,
            NotificationResponse,
        )
    ),
    tags(
        (name = "system", description = "Health and status"),
        (name = "items", description = "Media item queues and admin actions"),
        (name = "scheduler", description = "Scheduler control"),
        (name = "stats", description = "Statistics and notifications")
    ),
    info(
        title = "Fetcharr API",
        version = "0.1.0",
        description = "Admin surface for the fetcharr acquisition pipeline",
    )
)]
struct ApiDoc;

pub fn router(state: ApiState) -> Router {
    info!(target: "api", "building router");

    let api_v1 = Router::new()
        .route("/queues", get(list_queues))
        .route("/items", get(list_items))
        .route("/items/:id", get(get_item).delete(purge_item))
        .route("/items/:id/transition", post(transition_item))
        .route("/items/:id/reset", post(reset_item))
        .route("/items/:id/blacklist", post(blacklist_item))
        .route("/items/:id/unblacklist", post(unblacklist_item))
        .route("/items/:id/rescrape", post(rescrape_item))
        .route("/upgrades/check", post(upgrade_check))
        .route("/scheduler", get(scheduler_state))
        .route("/scheduler/pause", post(pause_scheduler))
        .route("/scheduler/resume", post(resume_scheduler))
        .route("/statistics", get(get_statistics))
        .route("/notifications", get(list_notifications));

    let openapi = ApiDoc::openapi();

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/v1", api_v1)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", openapi))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use fetcharr_application::not_wanted::NotWantedSets;
    use fetcharr_application::queues::QueueSet;
    use fetcharr_domain::{ItemState, MediaItem, Version};
    use fetcharr_infrastructure::repositories::Repository;
    use fetcharr_infrastructure::sqlite_adapters::{
        SqliteTorrentAttemptRepository, SqliteTvShowRepository,
    };
    use http_body_util::BodyExt;
    use sqlx::sqlite::SqlitePoolOptions;
    use tower::util::ServiceExt;

    mod fakes {
        use std::collections::HashMap;

        use async_trait::async_trait;
        use fetcharr_application::content_sources::ContentSourceClient;
        use fetcharr_application::debrid::{
            ActiveDownloads, DebridClient, DebridError, DebridTorrent, DebridTraffic,
        };
        use fetcharr_application::library::{LibraryClient, LibraryError, LibraryFile};
        use fetcharr_application::metadata::{MetadataClient, MetadataError, SeasonInfo};
        use fetcharr_application::scrapers::ScraperClient;

        pub struct Disconnected;

        #[async_trait]
        impl DebridClient for Disconnected {
            async fn test_connection(&self) -> Result<(), DebridError> {
                Err(DebridError::Request("offline".into()))
            }
            async fn add_magnet(&self, _magnet: &str) -> Result<String, DebridError> {
                Err(DebridError::Request("offline".into()))
            }
            async fn get_torrent(&self, _id: &str) -> Result<DebridTorrent, DebridError> {
                Err(DebridError::Request("offline".into()))
            }
            async fn select_all_files(&self, _id: &str) -> Result<(), DebridError> {
                Ok(())
            }
            async fn delete_torrent(&self, _id: &str) -> Result<(), DebridError> {
                Ok(())
            }
            async fn list_torrents(&self) -> Result<Vec<DebridTorrent>, DebridError> {
                Ok(Vec::new())
            }
            async fn get_traffic(&self) -> Result<DebridTraffic, DebridError> {
                Err(DebridError::Request("offline".into()))
            }
            async fn get_active_downloads(&self) -> Result<ActiveDownloads, DebridError> {
                Err(DebridError::Request("offline".into()))
            }
        }

        #[async_trait]
        impl LibraryClient for Disconnected {
            async fn find_by_filename(
                &self,
                _name: &str,
            ) -> Result<Option<LibraryFile>, LibraryError> {
                Ok(None)
            }
            async fn force_match(
                &self,
                _rating_key: &str,
                _tmdb_id: i64,
                _title: &str,
                _year: Option<i32>,
            ) -> Result<(), LibraryError> {
                Ok(())
            }
            async fn list_files(&self, _section: &str) -> Result<Vec<LibraryFile>, LibraryError> {
                Ok(Vec::new())
            }
        }

        #[async_trait]
        impl MetadataClient for Disconnected {
            async fn get_release_date(
                &self,
                _imdb_id: &str,
                _season: Option<i32>,
                _episode: Option<i32>,
            ) -> Result<Option<chrono::NaiveDate>, MetadataError> {
                Ok(None)
            }
            async fn get_show_airtime(
                &self,
                _imdb_id: &str,
            ) -> Result<Option<String>, MetadataError> {
                Ok(None)
            }
            async fn get_show_seasons(
                &self,
                _imdb_id: &str,
            ) -> Result<Vec<SeasonInfo>, MetadataError> {
                Ok(Vec::new())
            }
            async fn get_aliases(
                &self,
                _imdb_id: &str,
            ) -> Result<HashMap<String, Vec<String>>, MetadataError> {
                Ok(HashMap::new())
            }
        }

        pub fn no_scrapers() -> Vec<std::sync::Arc<dyn ScraperClient>> {
            Vec::new()
        }

        pub fn no_sources() -> Vec<std::sync::Arc<dyn ContentSourceClient>> {
            Vec::new()
        }
    }

    async fn test_state() -> (ApiState, tempfile::TempDir) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect");
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .expect("migrate");

        let tmp = tempfile::tempdir().expect("tempdir");
        let items = Arc::new(SqliteMediaItemRepository::new(pool.clone()));
        let (bus, _rx) = ChannelEventBus::new();
        let config = AppConfig::default();
        let pipeline = Arc::new(Pipeline::new(
            config.clone(),
            items.clone(),
            Arc::new(SqliteTorrentAttemptRepository::new(pool.clone())),
            Arc::new(SqliteNotificationRepository::new(pool.clone())),
            Arc::new(SqliteTvShowRepository::new(pool.clone())),
            fakes::no_sources(),
            fakes::no_scrapers(),
            Arc::new(fakes::Disconnected),
            Arc::new(fakes::Disconnected),
            Arc::new(fakes::Disconnected),
            Arc::new(QueueSet::new()),
            Arc::new(NotWantedSets::load(tmp.path()).expect("not-wanted")),
            Arc::new(bus),
        ));

        let state = ApiState {
            config,
            pipeline,
            items,
            statistics: Arc::new(SqliteStatisticsRepository::new(pool.clone())),
            notifications: Arc::new(SqliteNotificationRepository::new(pool)),
            pause: PauseControl::new(),
        };
        (state, tmp)
    }

    #[tokio::test]
    async fn health_endpoint_responds_ok() {
        let (state, _tmp) = test_state().await;
        let app = router(state);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn items_filter_by_state_and_reject_unknown_states() {
        let (state, _tmp) = test_state().await;
        let item = MediaItem::new_movie("Alien", Version::new("1080p"));
        state.items.create(item).await.expect("create");
        let app = router(state);

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/v1/items?state=wanted")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let items: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["title"], "Alien");
        assert_eq!(items[0]["state"], "wanted");

        let response = app
            .oneshot(
                Request::get("/api/v1/items?state=bogus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn blacklist_and_reset_round_trip() {
        let (state, _tmp) = test_state().await;
        let item = MediaItem::new_movie("Alien", Version::new("1080p"));
        let id = item.id;
        state.items.create(item).await.expect("create");
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::post(format!("/api/v1/items/{id}/blacklist"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stored = state
            .items
            .get_by_id(id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, ItemState::Blacklisted);

        let response = app
            .oneshot(
                Request::post(format!("/api/v1/items/{id}/reset"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stored = state
            .items
            .get_by_id(id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, ItemState::Wanted);
    }

    #[tokio::test]
    async fn scheduler_pause_and_resume_via_api() {
        let (state, _tmp) = test_state().await;
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/v1/scheduler/pause")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.pause.state().is_running());

        let response = app
            .oneshot(
                Request::post("/api/v1/scheduler/resume")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.pause.state().is_running());
    }
}
