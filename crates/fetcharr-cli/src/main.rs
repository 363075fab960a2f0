// SPDX-License-Identifier: GPL-3.0-or-later
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::serve;
use fetcharr_api::{router, ApiState};
use fetcharr_application::content_sources::{ContentSourceClient, TraktWatchlistSource};
use fetcharr_application::debrid::RealDebridClient;
use fetcharr_application::events::ChannelEventBus;
use fetcharr_application::library::PlexClient;
use fetcharr_application::metadata::TraktMetadataClient;
use fetcharr_application::not_wanted::NotWantedSets;
use fetcharr_application::queues::QueueSet;
use fetcharr_application::scrapers::{ScraperClient, TorrentioScraper};
use fetcharr_application::Pipeline;
use fetcharr_config::load as load_config;
use fetcharr_infrastructure::init_database;
use fetcharr_infrastructure::sqlite_adapters::{
    SqliteMediaItemRepository, SqliteNotificationRepository, SqliteStatisticsRepository,
    SqliteTorrentAttemptRepository, SqliteTvShowRepository,
};
use fetcharr_realtime::{LogRealtimeHub, RealtimeHub};
use fetcharr_scheduler::tasks::TaskDeps;
use fetcharr_scheduler::pause::PauseControl;
use fetcharr_scheduler::Scheduler;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path.as_deref())?;

    init_tracing(&config.telemetry.log_level);

    let pool = init_database(&config).await?;
    let items = Arc::new(SqliteMediaItemRepository::new(pool.clone()));
    let attempts = Arc::new(SqliteTorrentAttemptRepository::new(pool.clone()));
    let notifications = Arc::new(SqliteNotificationRepository::new(pool.clone()));
    let shows = Arc::new(SqliteTvShowRepository::new(pool.clone()));
    let statistics = Arc::new(SqliteStatisticsRepository::new(pool));

    let not_wanted = Arc::new(NotWantedSets::load(&config.sidecar.data_dir)?);
    if config.sidecar.purge_not_wanted_on_start {
        not_wanted.purge()?;
        info!(target: "cli", "not-wanted sets purged on startup");
    }

    let sources = content_sources(&config);
    let scrapers = scrapers(&config);
    let debrid = Arc::new(RealDebridClient::new(
        config.debrid.base_url.clone(),
        config.debrid.api_key.clone().unwrap_or_default(),
    ));
    let library = Arc::new(PlexClient::new(
        config.library.base_url.clone(),
        config.library.token.clone().unwrap_or_default(),
    ));
    let metadata = Arc::new(TraktMetadataClient::new(
        config.metadata.base_url.clone(),
        config.metadata.client_id.clone().unwrap_or_default(),
    ));

    let (bus, mut event_rx) = ChannelEventBus::new();
    let hub: Arc<dyn RealtimeHub> = Arc::new(LogRealtimeHub);
    let event_hub = hub.clone();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            event_hub.broadcast("events", &event.to_string()).await;
        }
    });

    let pipeline = Arc::new(Pipeline::new(
        config.clone(),
        items.clone(),
        attempts,
        notifications.clone(),
        shows,
        sources,
        scrapers,
        debrid,
        library,
        metadata,
        Arc::new(QueueSet::new()),
        not_wanted,
        Arc::new(bus),
    ));
    pipeline.rebuild_queues().await?;

    let pause = PauseControl::new();
    let deps = TaskDeps {
        pipeline: pipeline.clone(),
        statistics: statistics.clone(),
        notifications: notifications.clone(),
        hub,
        pause: pause.clone(),
    };
    let mut scheduler = Scheduler::new(config.clone(), deps);
    scheduler.register_tasks().await;
    scheduler.start().await?;

    let state = ApiState {
        config: config.clone(),
        pipeline,
        items,
        statistics,
        notifications,
        pause,
    };

    let listener = TcpListener::bind(bind_addr(&config.http)).await?;
    let addr = listener.local_addr()?;
    info!(target: "cli", "listening on {}", addr);

    serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    info!(target: "cli", "shutdown complete");

    Ok(())
}

fn init_tracing(default_level: &str) {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn content_sources(config: &fetcharr_config::AppConfig) -> Vec<Arc<dyn ContentSourceClient>> {
    config
        .content_sources
        .sources
        .iter()
        .filter(|source| source.enabled)
        .filter_map(|source| -> Option<Arc<dyn ContentSourceClient>> {
            let Some(username) = source.username.clone() else {
                warn!(target: "cli", source = %source.name, "source has no username, skipping");
                return None;
            };
            Some(Arc::new(
                TraktWatchlistSource::new(
                    source.base_url.clone(),
                    username,
                    source.api_key.clone().unwrap_or_default(),
                    source.enabled,
                )
                .with_policy(source.skip_watched, source.no_early_release),
            ))
        })
        .collect()
}

fn scrapers(config: &fetcharr_config::AppConfig) -> Vec<Arc<dyn ScraperClient>> {
    config
        .scraping
        .scrapers
        .iter()
        .filter(|endpoint| endpoint.enabled)
        .map(|endpoint| -> Arc<dyn ScraperClient> {
            Arc::new(TorrentioScraper::new(endpoint.clone()))
        })
        .collect()
}

fn bind_addr(http: &fetcharr_config::HttpConfig) -> SocketAddr {
    let addr = format!("{}:{}", http.host, http.port);
    addr.parse().expect("valid listen address")
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let mut interrupt = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("install SIGINT handler");

    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("install SIGTERM handler");

    #[cfg(not(unix))]
    let interrupt = tokio::signal::ctrl_c();

    #[cfg(unix)]
    tokio::select! {
        _ = interrupt.recv() => {},
        _ = terminate.recv() => {},
    }

    #[cfg(not(unix))]
    {
        interrupt.await.expect("ctrl_c handler");
    }

    info!(target: "cli", "shutdown signal received");
}
