// SPDX-License-Identifier: GPL-3.0-or-later
//! Queue processors. Each `process_*` method drains one state's queue,
//! loads the items, applies the guards for that state and advances items
//! through the store's conditional transition. Errors inside a single item
//! never abort the pass.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use fetcharr_config::AppConfig;
use fetcharr_domain::{
    AttemptId, AttemptOutcome, DomainEvent, ItemCollectedPayload, ItemId, ItemState,
    ItemUpgradedPayload, MediaItem, MediaType, Notification, NotificationId, Resolution,
    TorrentAttempt, TvShow, TvShowVersionStatus, Version, VersionProfile,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::content_sources::{ContentSourceClient, ContentSourceError, WantedItem};
use crate::debrid::{DebridClient, DebridError};
use crate::events::{transition_event, EventPublisher};
use crate::library::{scan_mount, LibraryClient};
use crate::metadata::MetadataClient;
use crate::normalizer::{normalize, NormalizerOptions};
use crate::not_wanted::NotWantedSets;
use crate::queues::QueueSet;
use crate::scrapers::{infohash_from_magnet, scrape_all, ScrapeQuery, ScraperClient};
use crate::selector::{SelectionContext, SelectionOutcome, Selector};
use crate::transitions::{admin_allowed, flow_allowed};
use crate::upgrades::{begin_upgrade, complete_upgrade, UpgradePolicy};
use fetcharr_infrastructure::repositories::{
    MediaItemRepository, NotificationRepository, ReconcileOutcome, Repository,
    TorrentAttemptRepository, TransitionOutcome, TvShowRepository, UpsertOutcome,
};
use fetcharr_infrastructure::retry::{retry_with_policy, RetryPolicy};
use fetcharr_infrastructure::sqlite_adapters::{
    SqliteMediaItemRepository, SqliteNotificationRepository, SqliteTorrentAttemptRepository,
    SqliteTvShowRepository,
};

/// Consecutive provider failures before the debrid breaker opens.
const DEBRID_BREAKER_THRESHOLD: u32 = 5;
/// How long the debrid breaker stays open before admitting a probe.
const DEBRID_BREAKER_COOLDOWN: Duration = Duration::from_secs(60);

pub struct Pipeline<E: EventPublisher> {
    config: AppConfig,
    store: Arc<SqliteMediaItemRepository>,
    attempts: Arc<SqliteTorrentAttemptRepository>,
    notifications: Arc<SqliteNotificationRepository>,
    shows: Arc<SqliteTvShowRepository>,
    content_sources: Vec<Arc<dyn ContentSourceClient>>,
    scrapers: Vec<Arc<dyn ScraperClient>>,
    debrid: Arc<dyn DebridClient>,
    library: Arc<dyn LibraryClient>,
    metadata: Arc<dyn MetadataClient>,
    queues: Arc<QueueSet>,
    not_wanted: Arc<NotWantedSets>,
    events: Arc<E>,
    debrid_breaker: CircuitBreaker,
    debrid_limiter: crate::rate_limit::RateLimiter,
    selector: AsyncMutex<Selector>,
    /// Alternative titles per imdb id, fetched once per process lifetime.
    alias_cache: AsyncMutex<HashMap<String, Vec<String>>>,
    /// Library verification failures per item while in Checking/Upgrading.
    check_failures: StdMutex<HashMap<ItemId, u32>>,
    /// Cached debrid-mount file set, refreshed by the recent scan task and
    /// used as a fallback when the library API is unreachable.
    mount_snapshot: StdMutex<HashSet<String>>,
    /// New score for in-flight upgrades, applied at completion.
    pending_upgrade_scores: StdMutex<HashMap<ItemId, i32>>,
}

impl<E: EventPublisher> Pipeline<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        store: Arc<SqliteMediaItemRepository>,
        attempts: Arc<SqliteTorrentAttemptRepository>,
        notifications: Arc<SqliteNotificationRepository>,
        shows: Arc<SqliteTvShowRepository>,
        content_sources: Vec<Arc<dyn ContentSourceClient>>,
        scrapers: Vec<Arc<dyn ScraperClient>>,
        debrid: Arc<dyn DebridClient>,
        library: Arc<dyn LibraryClient>,
        metadata: Arc<dyn MetadataClient>,
        queues: Arc<QueueSet>,
        not_wanted: Arc<NotWantedSets>,
        events: Arc<E>,
    ) -> Self {
        let debrid_limiter =
            crate::rate_limit::RateLimiter::per_minute(config.debrid.rate_limit_per_minute);
        Self {
            config,
            store,
            attempts,
            notifications,
            shows,
            content_sources,
            scrapers,
            debrid,
            library,
            metadata,
            queues,
            not_wanted,
            events,
            debrid_breaker: CircuitBreaker::new(
                "debrid",
                DEBRID_BREAKER_THRESHOLD,
                DEBRID_BREAKER_COOLDOWN,
            ),
            debrid_limiter,
            selector: AsyncMutex::new(Selector::new()),
            alias_cache: AsyncMutex::new(HashMap::new()),
            check_failures: StdMutex::new(HashMap::new()),
            mount_snapshot: StdMutex::new(HashSet::new()),
            pending_upgrade_scores: StdMutex::new(HashMap::new()),
        }
    }

    pub fn queues(&self) -> &QueueSet {
        self.queues.as_ref()
    }

    pub fn debrid_breaker(&self) -> &CircuitBreaker {
        &self.debrid_breaker
    }

    /// Connectivity probe against the debrid provider, for auto-resume.
    pub async fn debrid_healthy(&self) -> bool {
        self.debrid.test_connection().await.is_ok()
    }

    /// Cheap read against the store, for the DB health probe.
    pub async fn store_healthy(&self) -> bool {
        self.store.count_by_state(ItemState::Wanted).await.is_ok()
    }

    /// Rebuilds the in-memory queues from the store, in store order.
    pub async fn rebuild_queues(&self) -> Result<()> {
        let mut rows = Vec::new();
        for state in ItemState::queue_states() {
            for id in self.store.list_ids_by_state(*state).await? {
                rows.push((id, *state));
            }
        }
        info!(target: "pipeline", items = rows.len(), "rebuilt queues from store");
        self.queues.rebuild(rows);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    async fn load(&self, id: ItemId) -> Result<Option<MediaItem>> {
        self.store.get_by_id(id.to_string()).await
    }

    /// Pops the queue, re-reads each row and yields items still in `state`.
    /// Rows whose state moved underneath are re-filed to the right queue.
    async fn drain(&self, state: ItemState, limit: usize) -> Result<Vec<MediaItem>> {
        let mut items = Vec::new();
        for id in self.queues.pop_batch(state, limit) {
            match self.load(id).await? {
                Some(item) if item.state == state => items.push(item),
                Some(item) => self.queues.requeue(id, item.state),
                None => {}
            }
        }
        Ok(items)
    }

    /// Applies a flow transition. Returns false when the transition is not
    /// allowed from the item's current state or the store row changed
    /// underneath (the item is then re-filed from its stored state).
    async fn transition(&self, item: &mut MediaItem, to: ItemState) -> Result<bool> {
        let from = item.state;
        if !flow_allowed(from, to) {
            warn!(
                target: "pipeline",
                item_id = %item.id,
                from = from.as_str(),
                to = to.as_str(),
                "transition not allowed"
            );
            return Ok(false);
        }
        item.last_updated = Utc::now();
        match self.store.transition_state(item, from, to).await? {
            TransitionOutcome::Applied => {
                item.state = to;
                self.events.publish(&transition_event(item, from, to));
                self.queues.requeue(item.id, to);
                if matches!(to, ItemState::Collected | ItemState::Blacklisted) {
                    self.notify(item, from, to).await;
                }
                Ok(true)
            }
            TransitionOutcome::StateMismatch => {
                if let Some(current) = self.load(item.id).await? {
                    self.queues.requeue(item.id, current.state);
                }
                Ok(false)
            }
        }
    }

    async fn notify(&self, item: &MediaItem, from: ItemState, to: ItemState) {
        let notification = Notification {
            id: NotificationId::new(),
            item_id: item.id,
            from_state: from,
            to_state: to,
            title: item.title.clone(),
            created_at: Utc::now(),
            sent_at: None,
        };
        if let Err(error) = self.notifications.append(notification).await {
            warn!(target: "pipeline", item_id = %item.id, %error, "failed to enqueue notification");
        }
    }

    async fn record_attempt(
        &self,
        item: &MediaItem,
        hash: Option<&str>,
        outcome: AttemptOutcome,
        rationale: impl Into<String>,
    ) {
        let attempt = TorrentAttempt {
            id: AttemptId::new(),
            item_id: item.id,
            torrent_hash: hash.unwrap_or_default().to_string(),
            title: item
                .filled_by_title
                .clone()
                .unwrap_or_else(|| item.title.clone()),
            rationale: rationale.into(),
            outcome,
            added_at: Utc::now(),
        };
        if let Err(error) = self.attempts.append(attempt).await {
            warn!(target: "pipeline", item_id = %item.id, %error, "failed to record torrent attempt");
        }
    }

    fn profile_for(&self, item: &MediaItem) -> VersionProfile {
        self.config
            .versions
            .iter()
            .find(|p| p.name == item.version.stripped())
            .cloned()
            .unwrap_or_else(|| VersionProfile::new(item.version.stripped(), Resolution::R1080p))
    }

    fn selection_context(&self, item: &MediaItem) -> SelectionContext {
        let today = Utc::now().date_naive();
        let mut ctx = match item.media_type {
            MediaType::Movie => SelectionContext::for_movie(&item.title, item.year, today),
            MediaType::Episode => {
                let mut c = SelectionContext::for_episode(
                    &item.title,
                    item.season.unwrap_or(1),
                    item.episode.unwrap_or(1),
                    item.anime,
                    today,
                );
                // An episode row without an episode number wants the season.
                c.multi = item.episode.is_none();
                c.year = item.year;
                c
            }
        };
        ctx.runtime_minutes = item.runtime_minutes;
        ctx.physical_release_date = item.physical_release_date;
        ctx.force_priority = item
            .force_priority
            .clone()
            .map(|term| vec![term])
            .unwrap_or_default();
        ctx
    }

    /// Alternative titles for the item, cached by imdb id. Lookup failures
    /// are not cached so the next scrape retries them.
    async fn aliases_for(&self, item: &MediaItem) -> Vec<String> {
        let Some(imdb_id) = item.imdb_id.as_deref() else {
            return Vec::new();
        };
        let mut cache = self.alias_cache.lock().await;
        if let Some(aliases) = cache.get(imdb_id) {
            return aliases.clone();
        }
        let by_country = match self.metadata.get_aliases(imdb_id).await {
            Ok(by_country) => by_country,
            Err(error) => {
                debug!(target: "pipeline", item_id = %item.id, %error, "alias lookup failed");
                return Vec::new();
            }
        };
        let mut aliases: Vec<String> = Vec::new();
        for titles in by_country.into_values() {
            for title in titles {
                if title.eq_ignore_ascii_case(&item.title) {
                    continue;
                }
                if !aliases.iter().any(|a| a.eq_ignore_ascii_case(&title)) {
                    aliases.push(title);
                }
            }
        }
        cache.insert(imdb_id.to_string(), aliases.clone());
        aliases
    }

    async fn scrape_and_select(
        &self,
        item: &MediaItem,
        profile: &VersionProfile,
    ) -> SelectionOutcome {
        let query = ScrapeQuery {
            imdb_id: item.imdb_id.clone(),
            title: item.title.clone(),
            year: item.year,
            media_type: item.media_type,
            season: item.season,
            episode: item.episode,
        };
        let mut fanout = scrape_all(
            &self.scrapers,
            &query,
            self.config.scraping.scrape_concurrency,
        )
        .await;

        // The single-scraper fallback stays quiet while the provider is
        // down; those items wait for the breaker to close.
        if fanout.releases.is_empty()
            && item.fall_back_to_single_scraper
            && self.debrid_breaker.allow_request()
        {
            if let Some(first) = self.scrapers.iter().find(|s| s.enabled()).cloned() {
                debug!(target: "pipeline", item_id = %item.id, scraper = first.name(), "retrying with single scraper");
                fanout = scrape_all(&[first], &query, 1).await;
            }
        }

        let mut ctx = self.selection_context(item);
        ctx.aliases = self.aliases_for(item).await;
        let mut selector = self.selector.lock().await;
        selector.select(&ctx, profile, &fanout.releases)
    }

    /// First accepted candidate with a magnet whose hash is neither in the
    /// not-wanted set nor logged as rejected for any item.
    async fn usable_candidate(
        &self,
        outcome: &SelectionOutcome,
    ) -> Result<Option<crate::selector::ScoredCandidate>> {
        for candidate in &outcome.accepted {
            if candidate.release.magnet.is_none() {
                continue;
            }
            let Some(hash) = candidate.release.infohash() else {
                continue;
            };
            if self.not_wanted.contains_magnet(&hash) {
                continue;
            }
            if self.attempts.is_hash_rejected(&hash).await? {
                continue;
            }
            return Ok(Some(candidate.clone()));
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Content sources
    // ------------------------------------------------------------------

    /// Polls every enabled content source, normalizes the results into one
    /// item per version profile and upserts them as Wanted.
    pub async fn refresh_wanted(&self) -> Result<UpsertOutcome> {
        let today = Utc::now().date_naive();
        let versions: Vec<String> = self
            .config
            .versions
            .iter()
            .map(|p| p.name.clone())
            .collect();
        let mut totals = UpsertOutcome::default();

        for source in &self.content_sources {
            if !source.enabled() {
                continue;
            }
            let poll = retry_with_policy(
                &RetryPolicy::default(),
                source.name(),
                |error| matches!(error, ContentSourceError::Request(_)),
                || source.list_wanted(),
            )
            .await;
            let wanted = match poll {
                Ok(wanted) => wanted,
                Err(error) => {
                    warn!(target: "pipeline", source = source.name(), %error, "content source poll failed");
                    continue;
                }
            };
            // A failed history fetch degrades to ingesting everything
            // rather than dropping the poll.
            let watched = if source.skip_watched() {
                match source.watch_history().await {
                    Ok(watched) => watched,
                    Err(error) => {
                        warn!(target: "pipeline", source = source.name(), %error, "watch history fetch failed");
                        HashSet::new()
                    }
                }
            } else {
                HashSet::new()
            };
            let options = NormalizerOptions {
                source_name: source.name().to_string(),
                media_type_filter: source.media_type_filter(),
                ingest_future_movies: !self.config.content_sources.trakt_early_releases,
                no_early_release: source.no_early_release(),
            };
            let wanted = self.expand_shows(wanted).await;
            let items = normalize(&options, &wanted, &versions, today);
            let outcome = self.store.upsert_wanted(items, &watched).await?;
            debug!(
                target: "pipeline",
                source = source.name(),
                added = outcome.added,
                skipped_existing = outcome.skipped_existing,
                "content source refreshed"
            );
            totals.added += outcome.added;
            totals.skipped_existing += outcome.skipped_existing;
            totals.skipped_blacklisted += outcome.skipped_blacklisted;
            totals.skipped_watched += outcome.skipped_watched;
        }

        for id in self.store.list_ids_by_state(ItemState::Wanted).await? {
            self.queues.enqueue(ItemState::Wanted, id);
        }
        Ok(totals)
    }

    /// Show-level wanted entries (no episode number) become one entry per
    /// aired episode, seeding the show record and its per-version
    /// completeness counters along the way. Specials (season 0) are
    /// ignored. Entries whose season lookup fails are deferred to the next
    /// poll.
    async fn expand_shows(&self, wanted: Vec<WantedItem>) -> Vec<WantedItem> {
        let mut expanded = Vec::with_capacity(wanted.len());
        for entry in wanted {
            let is_show = entry.media_type == MediaType::Episode && entry.episode.is_none();
            if !is_show {
                expanded.push(entry);
                continue;
            }
            let Some(imdb_id) = entry.imdb_id.clone() else {
                warn!(target: "pipeline", title = %entry.title, "show entry has no imdb id, skipping");
                continue;
            };
            let mut seasons = match self.metadata.get_show_seasons(&imdb_id).await {
                Ok(seasons) => seasons,
                Err(error) => {
                    warn!(target: "pipeline", title = %entry.title, %error, "season lookup failed, deferring show");
                    continue;
                }
            };
            seasons.retain(|s| s.season >= 1 && s.episode_count > 0);
            seasons.sort_by_key(|s| s.season);
            if seasons.is_empty() {
                continue;
            }

            let show = match self.shows.get_by_imdb_id(&imdb_id).await {
                Ok(Some(existing)) => existing,
                Ok(None) => TvShow::new(entry.title.clone()),
                Err(error) => {
                    warn!(target: "pipeline", title = %entry.title, %error, "show lookup failed, deferring");
                    continue;
                }
            };
            let mut show = show;
            show.imdb_id = Some(imdb_id.clone());
            show.tmdb_id = entry.tmdb_id;
            show.year = entry.year;
            show.anime = entry.genres.iter().any(|g| g.eq_ignore_ascii_case("anime"));
            show.episodes_per_season = seasons.iter().map(|s| s.episode_count).collect();
            show.updated_at = Utc::now();
            let show = match self.shows.upsert(show).await {
                Ok(show) => show,
                Err(error) => {
                    warn!(target: "pipeline", title = %entry.title, %error, "show upsert failed, deferring");
                    continue;
                }
            };

            let in_scope = |season: i32| entry.requested_season.map_or(true, |r| r == season);
            let total: u32 = seasons
                .iter()
                .filter(|s| in_scope(s.season))
                .map(|s| s.episode_count)
                .sum();
            let previous = self
                .shows
                .list_version_status(show.id)
                .await
                .unwrap_or_default();
            for profile in &self.config.versions {
                let collected = previous
                    .iter()
                    .find(|s| s.version.stripped() == profile.name)
                    .map(|s| s.collected_episodes)
                    .unwrap_or(0);
                let status = TvShowVersionStatus {
                    show_id: show.id,
                    version: Version::new(profile.name.clone()),
                    total_episodes: total,
                    collected_episodes: collected,
                    updated_at: Utc::now(),
                };
                if let Err(error) = self.shows.set_version_status(status).await {
                    warn!(target: "pipeline", show = %show.title, %error, "version status write failed");
                }
            }

            for season in &seasons {
                if !in_scope(season.season) {
                    continue;
                }
                for episode in 1..=season.episode_count as i32 {
                    let mut episode_entry = entry.clone();
                    episode_entry.season = Some(season.season);
                    episode_entry.episode = Some(episode);
                    expanded.push(episode_entry);
                }
            }
        }
        expanded
    }

    /// Bump the show's per-version collected counter after an episode
    /// lands in the library.
    async fn note_episode_collected(&self, item: &MediaItem) {
        if item.media_type != MediaType::Episode {
            return;
        }
        let Some(imdb_id) = item.imdb_id.as_deref() else {
            return;
        };
        let show = match self.shows.get_by_imdb_id(imdb_id).await {
            Ok(Some(show)) => show,
            _ => return,
        };
        let statuses = match self.shows.list_version_status(show.id).await {
            Ok(statuses) => statuses,
            Err(_) => return,
        };
        let Some(mut status) = statuses
            .into_iter()
            .find(|s| s.version.stripped() == item.version.stripped())
        else {
            return;
        };
        status.collected_episodes = (status.collected_episodes + 1).min(status.total_episodes);
        status.updated_at = Utc::now();
        if let Err(error) = self.shows.set_version_status(status).await {
            warn!(target: "pipeline", item_id = %item.id, %error, "version status update failed");
        }
    }

    // ------------------------------------------------------------------
    // Queue processors
    // ------------------------------------------------------------------

    /// Wanted: released items move on to Scraping, future ones are parked
    /// in Unreleased.
    pub async fn process_wanted(&self, limit: usize) -> Result<()> {
        let today = Utc::now().date_naive();
        for mut item in self.drain(ItemState::Wanted, limit).await? {
            if item.is_released(today) {
                self.transition(&mut item, ItemState::Scraping).await?;
            } else {
                self.transition(&mut item, ItemState::Unreleased).await?;
            }
        }
        Ok(())
    }

    /// Unreleased: refresh release dates and release items whose date
    /// arrived or whose early-release flag fired.
    pub async fn process_unreleased(&self, limit: usize) -> Result<()> {
        let today = Utc::now().date_naive();
        for mut item in self.drain(ItemState::Unreleased, limit).await? {
            if let Some(imdb_id) = item.imdb_id.clone() {
                match self
                    .metadata
                    .get_release_date(&imdb_id, item.season, item.episode)
                    .await
                {
                    Ok(date) if date != item.release_date => {
                        item.release_date = date;
                        item.last_updated = Utc::now();
                        self.store.update(item.clone()).await?;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(target: "pipeline", item_id = %item.id, %error, "release date refresh failed");
                    }
                }
            }
            if item.is_released(today) {
                self.transition(&mut item, ItemState::Wanted).await?;
            } else {
                self.queues.enqueue(ItemState::Unreleased, item.id);
            }
        }
        Ok(())
    }

    /// Scraping: fan out, select, pick the best usable candidate or put the
    /// item to sleep.
    pub async fn process_scraping(&self, limit: usize) -> Result<()> {
        for mut item in self.drain(ItemState::Scraping, limit).await? {
            let profile = self.profile_for(&item);
            let outcome = self.scrape_and_select(&item, &profile).await;
            match self.usable_candidate(&outcome).await? {
                Some(candidate) => {
                    item.filled_by_magnet = candidate.release.magnet.clone();
                    item.filled_by_title = Some(candidate.release.title.clone());
                    item.original_scraped_torrent_title = Some(candidate.release.title.clone());
                    item.current_score = Some(candidate.score);
                    self.transition(&mut item, ItemState::Adding).await?;
                }
                None => {
                    debug!(target: "pipeline", item_id = %item.id, title = %item.title, "no usable release, sleeping");
                    item.sleep_cycles += 1;
                    self.transition(&mut item, ItemState::Sleeping).await?;
                }
            }
        }
        Ok(())
    }

    /// Adding: hand the magnet to the debrid provider.
    pub async fn process_adding(&self, limit: usize) -> Result<()> {
        for mut item in self.drain(ItemState::Adding, limit).await? {
            let Some(magnet) = item.filled_by_magnet.clone() else {
                item.clear_fulfillment();
                self.transition(&mut item, ItemState::Scraping).await?;
                continue;
            };
            let hash = infohash_from_magnet(&magnet);

            // Dedup guard, re-checked at the last moment before adding.
            if let Some(hash) = &hash {
                if self.not_wanted.contains_magnet(hash)
                    || self.attempts.is_hash_rejected(hash).await?
                {
                    self.record_attempt(
                        &item,
                        Some(hash),
                        AttemptOutcome::Rejected,
                        "hash is not wanted",
                    )
                    .await;
                    item.clear_fulfillment();
                    self.transition(&mut item, ItemState::Scraping).await?;
                    continue;
                }
            }

            if !self.debrid_breaker.allow_request() {
                self.queues.enqueue(ItemState::Adding, item.id);
                continue;
            }
            self.debrid_limiter.acquire("debrid").await;

            match self.debrid.add_magnet(&magnet).await {
                Ok(torrent_id) => {
                    self.debrid_breaker.record_success();
                    if let Err(error) = self.debrid.select_all_files(&torrent_id).await {
                        warn!(target: "pipeline", item_id = %item.id, %error, "file selection failed");
                    }
                    item.filled_by_torrent_id = Some(torrent_id.clone());
                    item.final_check_add_timestamp = Some(Utc::now());
                    match self.debrid.get_torrent(&torrent_id).await {
                        Ok(torrent) if torrent.state.is_cached() => {
                            item.filled_by_file = Some(torrent.filename.clone());
                            self.record_attempt(
                                &item,
                                hash.as_deref(),
                                AttemptOutcome::Cached,
                                "cached on add",
                            )
                            .await;
                            self.transition(&mut item, ItemState::Checking).await?;
                        }
                        Ok(_) => {
                            self.record_attempt(
                                &item,
                                hash.as_deref(),
                                AttemptOutcome::Uncached,
                                "not cached on add",
                            )
                            .await;
                            self.transition(&mut item, ItemState::PendingUncached)
                                .await?;
                        }
                        Err(error) => {
                            if error.is_provider_wide() {
                                self.debrid_breaker.record_failure();
                            }
                            warn!(target: "pipeline", item_id = %item.id, %error, "status check failed after add");
                            self.store.update(item.clone()).await?;
                            self.queues.enqueue(ItemState::Adding, item.id);
                        }
                    }
                }
                Err(DebridError::InfringingTorrent) => {
                    if let Some(hash) = &hash {
                        if let Err(error) = self.not_wanted.add_magnet(hash) {
                            warn!(target: "pipeline", %error, "failed to persist not-wanted hash");
                        }
                    }
                    self.record_attempt(
                        &item,
                        hash.as_deref(),
                        AttemptOutcome::Blacklisted,
                        "provider flagged infringing",
                    )
                    .await;
                    item.clear_fulfillment();
                    self.transition(&mut item, ItemState::Scraping).await?;
                }
                Err(DebridError::InvalidMagnet) => {
                    self.record_attempt(
                        &item,
                        hash.as_deref(),
                        AttemptOutcome::Failed,
                        "invalid magnet",
                    )
                    .await;
                    item.clear_fulfillment();
                    self.transition(&mut item, ItemState::Scraping).await?;
                }
                Err(DebridError::TooManyActiveDownloads) => {
                    // Rate pressure is not a failure; wait it out.
                    item.final_check_add_timestamp = Some(Utc::now());
                    self.transition(&mut item, ItemState::PendingUncached)
                        .await?;
                }
                Err(error) if error.is_provider_wide() => {
                    self.debrid_breaker.record_failure();
                    warn!(target: "pipeline", item_id = %item.id, %error, "debrid unavailable");
                    self.queues.enqueue(ItemState::Adding, item.id);
                }
                Err(error) => {
                    self.record_attempt(
                        &item,
                        hash.as_deref(),
                        AttemptOutcome::Failed,
                        error.to_string(),
                    )
                    .await;
                    item.clear_fulfillment();
                    self.transition(&mut item, ItemState::Scraping).await?;
                }
            }
        }
        Ok(())
    }

    /// Pending Uncached: poll the torrent until it caches or the window
    /// expires.
    pub async fn process_pending_uncached(&self, limit: usize) -> Result<()> {
        let window =
            chrono::Duration::seconds(self.config.debrid.uncached_window_secs as i64);
        for mut item in self.drain(ItemState::PendingUncached, limit).await? {
            let expired = item
                .final_check_add_timestamp
                .map(|t| Utc::now() - t > window)
                .unwrap_or(true);

            let Some(torrent_id) = item.filled_by_torrent_id.clone() else {
                // Parked by rate pressure without a torrent; retry the add
                // until the window closes.
                if expired {
                    item.clear_fulfillment();
                    self.transition(&mut item, ItemState::Scraping).await?;
                    continue;
                }
                let magnet = item.filled_by_magnet.clone();
                let Some(magnet) = magnet.filter(|_| self.debrid_breaker.allow_request()) else {
                    self.queues.enqueue(ItemState::PendingUncached, item.id);
                    continue;
                };
                // Stay parked while the account's slot quota is full rather
                // than spending an add that error 21 would bounce. A failed
                // quota read falls through to the add itself.
                match self.debrid.get_active_downloads().await {
                    Ok(active) if active.at_capacity() => {
                        debug!(
                            target: "pipeline",
                            item_id = %item.id,
                            count = active.count,
                            limit = active.limit,
                            "provider at download capacity"
                        );
                        self.queues.enqueue(ItemState::PendingUncached, item.id);
                        continue;
                    }
                    _ => {}
                }
                self.debrid_limiter.acquire("debrid").await;
                match self.debrid.add_magnet(&magnet).await {
                    Ok(id) => {
                        self.debrid_breaker.record_success();
                        let _ = self.debrid.select_all_files(&id).await;
                        item.filled_by_torrent_id = Some(id);
                        item.last_updated = Utc::now();
                        self.store.update(item.clone()).await?;
                        self.queues.enqueue(ItemState::PendingUncached, item.id);
                    }
                    Err(DebridError::TooManyActiveDownloads) => {
                        self.queues.enqueue(ItemState::PendingUncached, item.id);
                    }
                    Err(error) if error.is_provider_wide() => {
                        self.debrid_breaker.record_failure();
                        warn!(target: "pipeline", item_id = %item.id, %error, "debrid unavailable");
                        self.queues.enqueue(ItemState::PendingUncached, item.id);
                    }
                    Err(error) => {
                        let hash =
                            item.filled_by_magnet.as_deref().and_then(infohash_from_magnet);
                        self.record_attempt(
                            &item,
                            hash.as_deref(),
                            AttemptOutcome::Failed,
                            error.to_string(),
                        )
                        .await;
                        item.clear_fulfillment();
                        self.transition(&mut item, ItemState::Scraping).await?;
                    }
                }
                continue;
            };

            match self.debrid.get_torrent(&torrent_id).await {
                Ok(torrent) if torrent.state.is_cached() => {
                    item.filled_by_file = Some(torrent.filename.clone());
                    self.transition(&mut item, ItemState::Checking).await?;
                }
                Ok(torrent) if torrent.state.is_terminal_failure() => {
                    let hash = item.filled_by_magnet.as_deref().and_then(infohash_from_magnet);
                    self.record_attempt(
                        &item,
                        hash.as_deref(),
                        AttemptOutcome::Failed,
                        format!("torrent failed while pending: {:?}", torrent.state),
                    )
                    .await;
                    let _ = self.debrid.delete_torrent(&torrent_id).await;
                    item.clear_fulfillment();
                    self.transition(&mut item, ItemState::Scraping).await?;
                }
                Ok(_) if expired => {
                    let hash = item.filled_by_magnet.as_deref().and_then(infohash_from_magnet);
                    self.record_attempt(
                        &item,
                        hash.as_deref(),
                        AttemptOutcome::Uncached,
                        "uncached window expired",
                    )
                    .await;
                    let _ = self.debrid.delete_torrent(&torrent_id).await;
                    item.clear_fulfillment();
                    self.transition(&mut item, ItemState::Scraping).await?;
                }
                Ok(_) => {
                    self.queues.enqueue(ItemState::PendingUncached, item.id);
                }
                Err(error) => {
                    if error.is_provider_wide() {
                        self.debrid_breaker.record_failure();
                    }
                    warn!(target: "pipeline", item_id = %item.id, %error, "pending status check failed");
                    self.queues.enqueue(ItemState::PendingUncached, item.id);
                }
            }
        }
        Ok(())
    }

    /// Checking: confirm the file surfaced in the library, then collect.
    pub async fn process_checking(&self, limit: usize) -> Result<()> {
        for mut item in self.drain(ItemState::Checking, limit).await? {
            let Some(file) = item.filled_by_file.clone() else {
                item.clear_fulfillment();
                self.transition(&mut item, ItemState::Scraping).await?;
                continue;
            };

            match self.library.find_by_filename(&file).await {
                Ok(Some(_)) => {
                    self.clear_check_failures(item.id);
                    let now = Utc::now();
                    item.collected_at = Some(now);
                    if item.original_collected_at.is_none() {
                        item.original_collected_at = Some(now);
                    }
                    self.events.publish(&DomainEvent::new(
                        "item.collected",
                        ItemCollectedPayload {
                            item_id: item.id,
                            title: item.title.clone(),
                            version: item.version.clone(),
                            filled_by_file: item.filled_by_file.clone(),
                        },
                    ));
                    info!(target: "pipeline", item_id = %item.id, title = %item.title, file = %file, "collected");
                    self.note_episode_collected(&item).await;
                    self.transition(&mut item, ItemState::Collected).await?;
                }
                Ok(None) => {
                    let failures = self.bump_check_failures(item.id);
                    if failures >= self.config.debrid.max_check_failures {
                        self.clear_check_failures(item.id);
                        let hash = item.filled_by_magnet.as_deref().and_then(infohash_from_magnet);
                        self.record_attempt(
                            &item,
                            hash.as_deref(),
                            AttemptOutcome::Failed,
                            "file never surfaced in library",
                        )
                        .await;
                        item.clear_fulfillment();
                        self.transition(&mut item, ItemState::Scraping).await?;
                    } else {
                        self.queues.enqueue(ItemState::Checking, item.id);
                    }
                }
                Err(error) => {
                    // Degrade to the mount snapshot while the library API
                    // is unreachable.
                    let on_mount = self
                        .mount_snapshot
                        .lock()
                        .expect("mount snapshot lock")
                        .contains(&file);
                    if on_mount {
                        warn!(target: "pipeline", item_id = %item.id, %error, "library unreachable, collecting from mount snapshot");
                        self.clear_check_failures(item.id);
                        let now = Utc::now();
                        item.collected_at = Some(now);
                        if item.original_collected_at.is_none() {
                            item.original_collected_at = Some(now);
                        }
                        self.note_episode_collected(&item).await;
                        self.transition(&mut item, ItemState::Collected).await?;
                    } else {
                        warn!(target: "pipeline", item_id = %item.id, %error, "library lookup failed");
                        self.queues.enqueue(ItemState::Checking, item.id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-scan the debrid mount and replace the cached file set. Returns
    /// the number of files seen.
    pub fn refresh_mount_snapshot(&self) -> usize {
        let files = scan_mount(&self.config.library.mount_path);
        let count = files.len();
        *self.mount_snapshot.lock().expect("mount snapshot lock") = files;
        debug!(target: "pipeline", files = count, "mount snapshot refreshed");
        count
    }

    /// Resolve on-disk paths for Checking items whose file has appeared on
    /// the debrid mount but has not yet been matched by the library.
    pub async fn process_pending_rclone_paths(&self) -> Result<usize> {
        let present = scan_mount(&self.config.library.mount_path);
        let mount = self.config.library.mount_path.trim_end_matches('/');
        let mut resolved = 0;
        for id in self.queues.snapshot(ItemState::Checking) {
            let Some(mut item) = self.load(id).await? else {
                continue;
            };
            if item.location_on_disk.is_some() {
                continue;
            }
            let Some(file) = item.filled_by_file.clone() else {
                continue;
            };
            if present.contains(&file) {
                item.location_on_disk = Some(format!("{mount}/{file}"));
                item.last_updated = Utc::now();
                self.store.update(item).await?;
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    /// Sleeping: wake items whose cycle elapsed; exhausted items are
    /// blacklisted.
    pub async fn process_sleeping(&self, limit: usize) -> Result<()> {
        let cycle = chrono::Duration::seconds(self.config.scraping.sleep_cycle_secs as i64);
        for mut item in self.drain(ItemState::Sleeping, limit).await? {
            if Utc::now() - item.last_updated < cycle {
                self.queues.enqueue(ItemState::Sleeping, item.id);
                continue;
            }
            let profile = self.profile_for(&item);
            if item.wake_count >= profile.wake_count {
                info!(target: "pipeline", item_id = %item.id, title = %item.title, "wake budget exhausted, blacklisting");
                item.blacklisted_date = Some(Utc::now());
                self.transition(&mut item, ItemState::Blacklisted).await?;
            } else {
                item.wake_count += 1;
                self.transition(&mut item, ItemState::Wanted).await?;
            }
        }
        Ok(())
    }

    fn bump_check_failures(&self, id: ItemId) -> u32 {
        let mut failures = self.check_failures.lock().expect("check failure lock");
        let count = failures.entry(id).or_insert(0);
        *count += 1;
        *count
    }

    fn clear_check_failures(&self, id: ItemId) {
        self.check_failures
            .lock()
            .expect("check failure lock")
            .remove(&id);
    }

    // ------------------------------------------------------------------
    // Upgrades
    // ------------------------------------------------------------------

    /// Rescores every Collected item inside its upgrade window and promotes
    /// those with a sufficiently better candidate. Returns the number of
    /// items moved to Upgrading.
    pub async fn upgrade_sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let policy = UpgradePolicy::new(
            self.config.upgrades.window_days,
            self.config.upgrades.percentage_threshold,
        );
        let collected = self.store.list_by_state(ItemState::Collected, 500, 0).await?;
        let mut promoted = 0;

        for mut item in collected {
            if !policy.eligible(&item, now) {
                continue;
            }
            let profile = self.profile_for(&item);
            let outcome = self.scrape_and_select(&item, &profile).await;
            let Some(candidate) = self.usable_candidate(&outcome).await? else {
                continue;
            };
            if !policy.should_upgrade(item.current_score, candidate.score) {
                continue;
            }

            let magnet = candidate.release.magnet.clone();
            let title = candidate.release.title.clone();
            let score = candidate.score;
            begin_upgrade(&mut item, candidate);
            item.filled_by_magnet = magnet;
            item.filled_by_title = Some(title.clone());
            item.original_scraped_torrent_title = Some(title);
            item.filled_by_file = None;
            item.filled_by_torrent_id = None;
            item.final_check_add_timestamp = None;
            self.pending_upgrade_scores
                .lock()
                .expect("upgrade score lock")
                .insert(item.id, score);
            if self.transition(&mut item, ItemState::Upgrading).await? {
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    /// Upgrading: add the replacement torrent, verify it, then commit the
    /// upgrade. Any failure restores the previous fulfillment.
    pub async fn process_upgrading(&self, limit: usize) -> Result<()> {
        let window =
            chrono::Duration::seconds(self.config.debrid.uncached_window_secs as i64);
        for mut item in self.drain(ItemState::Upgrading, limit).await? {
            let Some(torrent_id) = item.filled_by_torrent_id.clone() else {
                self.add_upgrade_torrent(&mut item).await?;
                continue;
            };

            match self.debrid.get_torrent(&torrent_id).await {
                Ok(torrent) if torrent.state.is_cached() => {
                    if item.filled_by_file.is_none() {
                        item.filled_by_file = Some(torrent.filename.clone());
                    }
                    self.verify_upgrade(&mut item).await?;
                }
                Ok(torrent) if torrent.state.is_terminal_failure() => {
                    let _ = self.debrid.delete_torrent(&torrent_id).await;
                    self.abort_upgrade_item(&mut item, "replacement torrent failed")
                        .await?;
                }
                Ok(_) => {
                    let expired = item
                        .final_check_add_timestamp
                        .map(|t| Utc::now() - t > window)
                        .unwrap_or(true);
                    if expired {
                        let _ = self.debrid.delete_torrent(&torrent_id).await;
                        self.abort_upgrade_item(&mut item, "replacement never cached")
                            .await?;
                    } else {
                        self.queues.enqueue(ItemState::Upgrading, item.id);
                    }
                }
                Err(error) => {
                    if error.is_provider_wide() {
                        self.debrid_breaker.record_failure();
                    }
                    warn!(target: "pipeline", item_id = %item.id, %error, "upgrade status check failed");
                    self.queues.enqueue(ItemState::Upgrading, item.id);
                }
            }
        }
        Ok(())
    }

    async fn add_upgrade_torrent(&self, item: &mut MediaItem) -> Result<()> {
        let Some(magnet) = item.filled_by_magnet.clone() else {
            self.abort_upgrade_item(item, "upgrade lost its magnet").await?;
            return Ok(());
        };
        if !self.debrid_breaker.allow_request() {
            self.queues.enqueue(ItemState::Upgrading, item.id);
            return Ok(());
        }
        self.debrid_limiter.acquire("debrid").await;
        match self.debrid.add_magnet(&magnet).await {
            Ok(torrent_id) => {
                self.debrid_breaker.record_success();
                if let Err(error) = self.debrid.select_all_files(&torrent_id).await {
                    warn!(target: "pipeline", item_id = %item.id, %error, "file selection failed");
                }
                item.filled_by_torrent_id = Some(torrent_id);
                item.final_check_add_timestamp = Some(Utc::now());
                self.store.update(item.clone()).await?;
                self.queues.enqueue(ItemState::Upgrading, item.id);
            }
            Err(error) if error.is_provider_wide() => {
                self.debrid_breaker.record_failure();
                self.queues.enqueue(ItemState::Upgrading, item.id);
            }
            Err(error) => {
                self.abort_upgrade_item(item, error.to_string()).await?;
            }
        }
        Ok(())
    }

    async fn verify_upgrade(&self, item: &mut MediaItem) -> Result<()> {
        let Some(file) = item.filled_by_file.clone() else {
            self.queues.enqueue(ItemState::Upgrading, item.id);
            return Ok(());
        };
        match self.library.find_by_filename(&file).await {
            Ok(Some(_)) => {
                self.clear_check_failures(item.id);
                let new_score = self
                    .pending_upgrade_scores
                    .lock()
                    .expect("upgrade score lock")
                    .remove(&item.id)
                    .or(item.current_score)
                    .unwrap_or(0);
                let score_before = item.current_score;
                let previous_file = item.upgrading_from.clone();
                let old_torrent = item.upgrading_from_torrent_id.clone();
                let now = Utc::now();
                complete_upgrade(item, new_score, now);
                item.upgrading_from = None;
                item.upgrading_from_version = None;
                item.upgrading_from_torrent_id = None;

                let hash = item.filled_by_magnet.as_deref().and_then(infohash_from_magnet);
                self.record_attempt(item, hash.as_deref(), AttemptOutcome::Upgraded, "upgrade committed")
                    .await;

                // Best-effort cleanup of the torrent we upgraded away from.
                if let Some(old) = old_torrent {
                    if let Err(error) = self.debrid.delete_torrent(&old).await {
                        warn!(target: "pipeline", item_id = %item.id, %error, "failed to remove previous torrent");
                    }
                }

                self.events.publish(&DomainEvent::new(
                    "item.upgraded",
                    ItemUpgradedPayload {
                        item_id: item.id,
                        title: item.title.clone(),
                        previous_file,
                        new_file: item.filled_by_file.clone(),
                        score_before,
                        score_after: Some(new_score),
                    },
                ));
                info!(target: "pipeline", item_id = %item.id, title = %item.title, "upgrade committed");
                self.transition(item, ItemState::Collected).await?;
            }
            Ok(None) => {
                let failures = self.bump_check_failures(item.id);
                if failures >= self.config.debrid.max_check_failures {
                    self.clear_check_failures(item.id);
                    if let Some(torrent_id) = item.filled_by_torrent_id.clone() {
                        let _ = self.debrid.delete_torrent(&torrent_id).await;
                    }
                    self.abort_upgrade_item(item, "replacement never surfaced in library")
                        .await?;
                } else {
                    self.queues.enqueue(ItemState::Upgrading, item.id);
                }
            }
            Err(error) => {
                warn!(target: "pipeline", item_id = %item.id, %error, "library lookup failed");
                self.queues.enqueue(ItemState::Upgrading, item.id);
            }
        }
        Ok(())
    }

    async fn abort_upgrade_item(
        &self,
        item: &mut MediaItem,
        reason: impl Into<String>,
    ) -> Result<()> {
        let reason = reason.into();
        warn!(target: "pipeline", item_id = %item.id, title = %item.title, %reason, "upgrade aborted");
        let hash = item.filled_by_magnet.as_deref().and_then(infohash_from_magnet);
        self.record_attempt(item, hash.as_deref(), AttemptOutcome::Failed, reason)
            .await;
        self.pending_upgrade_scores
            .lock()
            .expect("upgrade score lock")
            .remove(&item.id);

        // Restore the fulfillment we were upgrading away from.
        item.filled_by_file = item.upgrading_from.take();
        item.filled_by_torrent_id = item.upgrading_from_torrent_id.take();
        item.filled_by_magnet = None;
        item.upgrading_from_version = None;

        self.transition(item, ItemState::Collected).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Library reconciliation & admin
    // ------------------------------------------------------------------

    /// Scans the debrid mount and reconciles Collected rows against what is
    /// actually on disk.
    pub async fn reconcile_library(&self) -> Result<ReconcileOutcome> {
        let present = scan_mount(&self.config.library.mount_path);
        let outcome = self
            .store
            .reconcile_presence(&present, self.config.library.rescrape_missing_files)
            .await?;
        if outcome.reverted > 0 {
            for id in self.store.list_ids_by_state(ItemState::Wanted).await? {
                self.queues.enqueue(ItemState::Wanted, id);
            }
        }
        Ok(outcome)
    }

    /// Operator-initiated transition: reset to Wanted or force a blacklist.
    pub async fn admin_transition(&self, id: ItemId, to: ItemState) -> Result<bool> {
        let Some(mut item) = self.load(id).await? else {
            return Ok(false);
        };
        let from = item.state;
        if !admin_allowed(from, to) {
            return Ok(false);
        }
        match to {
            ItemState::Wanted => {
                item.clear_fulfillment();
                item.wake_count = 0;
                item.sleep_cycles = 0;
                item.blacklisted_date = None;
                item.current_score = None;
                item.collected_at = None;
            }
            ItemState::Blacklisted => {
                item.blacklisted_date = Some(Utc::now());
            }
            _ => return Ok(false),
        }
        item.last_updated = Utc::now();
        match self.store.transition_state(&item, from, to).await? {
            TransitionOutcome::Applied => {
                item.state = to;
                self.events.publish(&transition_event(&item, from, to));
                self.queues.requeue(item.id, to);
                if to == ItemState::Blacklisted {
                    self.notify(&item, from, to).await;
                }
                Ok(true)
            }
            TransitionOutcome::StateMismatch => Ok(false),
        }
    }

    /// Re-run scraping for an item regardless of where it currently sits,
    /// used by the admin rescrape endpoint.
    pub async fn rescrape(&self, id: ItemId) -> Result<bool> {
        let Some(mut item) = self.load(id).await? else {
            return Ok(false);
        };
        if item.state.is_terminal() {
            return Ok(false);
        }
        if item.state == ItemState::Scraping {
            self.queues.enqueue(ItemState::Scraping, item.id);
            return Ok(true);
        }
        let from = item.state;
        item.clear_fulfillment();
        item.last_updated = Utc::now();
        match self
            .store
            .transition_state(&item, from, ItemState::Scraping)
            .await?
        {
            TransitionOutcome::Applied => {
                item.state = ItemState::Scraping;
                self.events
                    .publish(&transition_event(&item, from, ItemState::Scraping));
                self.queues.requeue(item.id, ItemState::Scraping);
                Ok(true)
            }
            TransitionOutcome::StateMismatch => Ok(false),
        }
    }
}
