// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use fetcharr_domain::{
    AttemptId, AttemptOutcome, ItemId, ItemIdentity, ItemState, MediaItem, MediaType,
    Notification, NotificationId, ShowId, StatisticsSummary, TorrentAttempt, TvShow,
    TvShowVersionStatus, Version,
};
use sqlx::Row;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::repositories::{
    MediaItemRepository, NotificationRepository, ReconcileOutcome, Repository,
    StatisticsRepository, TorrentAttemptRepository, TransitionOutcome, TvShowRepository,
    UpsertOutcome,
};
use crate::retry::{retry_with_policy, RetryPolicy};

// ============================================================================
// Write retry
// ============================================================================

/// Bounded retry settings applied to every write.
#[derive(Debug, Clone, Copy)]
pub struct WritePolicy {
    pub attempts: u32,
    pub slow_warn_ms: u64,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            slow_warn_ms: 2_000,
        }
    }
}

impl WritePolicy {
    pub fn from_config(db: &fetcharr_config::DatabaseConfig) -> Self {
        Self {
            attempts: db.write_retry_attempts.max(1),
            slow_warn_ms: db.slow_write_warn_ms,
        }
    }
}

fn is_lock_contention(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db)) => {
            let msg = db.message().to_lowercase();
            msg.contains("locked") || msg.contains("busy")
        }
        _ => false,
    }
}

/// Runs a write, retrying with jittered exponential backoff while SQLite
/// reports lock contention. Non-lock errors surface immediately.
async fn with_write_retry<T, F, Fut>(policy: WritePolicy, label: &str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let started = Instant::now();
    let retry = RetryPolicy::new(
        policy.attempts,
        Duration::from_millis(50),
        Duration::from_secs(2),
    );
    let result = retry_with_policy(&retry, label, is_lock_contention, op).await;
    if result.is_ok() {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms > policy.slow_warn_ms {
            warn!(target: "repository", label, elapsed_ms, "slow database write");
        }
    }
    result
}

// ============================================================================
// Media items
// ============================================================================

/// SQLx-backed media item repository
pub struct SqliteMediaItemRepository {
    pool: SqlitePool,
    policy: WritePolicy,
}

impl SqliteMediaItemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            policy: WritePolicy::default(),
        }
    }

    pub fn with_policy(pool: SqlitePool, policy: WritePolicy) -> Self {
        Self { pool, policy }
    }
}

const ITEM_VALUE_COLUMNS: &str = "\
    imdb_id, tmdb_id, media_type, season, episode, version, \
    title, year, episode_title, release_date, physical_release_date, \
    runtime_minutes, airtime, genres, country, anime, early_release, no_early_release, \
    content_source, content_source_detail, requested_season, disable_not_wanted_check, \
    filled_by_file, filled_by_title, filled_by_magnet, filled_by_torrent_id, \
    location_on_disk, original_path_for_symlink, original_scraped_torrent_title, \
    upgrading_from, upgrading_from_version, upgrading_from_torrent_id, upgraded, current_score, \
    wake_count, sleep_cycles, last_updated, collected_at, original_collected_at, \
    blacklisted_date, final_check_add_timestamp, force_priority, fall_back_to_single_scraper";

const ITEM_UPDATE_SET: &str = "\
    imdb_id = ?, tmdb_id = ?, media_type = ?, season = ?, episode = ?, version = ?, \
    title = ?, year = ?, episode_title = ?, release_date = ?, physical_release_date = ?, \
    runtime_minutes = ?, airtime = ?, genres = ?, country = ?, anime = ?, early_release = ?, no_early_release = ?, \
    content_source = ?, content_source_detail = ?, requested_season = ?, disable_not_wanted_check = ?, \
    filled_by_file = ?, filled_by_title = ?, filled_by_magnet = ?, filled_by_torrent_id = ?, \
    location_on_disk = ?, original_path_for_symlink = ?, original_scraped_torrent_title = ?, \
    upgrading_from = ?, upgrading_from_version = ?, upgrading_from_torrent_id = ?, upgraded = ?, current_score = ?, \
    wake_count = ?, sleep_cycles = ?, last_updated = ?, collected_at = ?, original_collected_at = ?, \
    blacklisted_date = ?, final_check_add_timestamp = ?, force_priority = ?, fall_back_to_single_scraper = ?, \
    state = ?";

// Null-safe identity match.
const IDENTITY_WHERE: &str =
    "imdb_id IS ? AND tmdb_id IS ? AND media_type = ? AND season IS ? AND episode IS ?";

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Binds every non-id column in `ITEM_VALUE_COLUMNS` order.
fn bind_item_values<'q>(q: SqliteQuery<'q>, item: &MediaItem) -> Result<SqliteQuery<'q>> {
    let genres = serde_json::to_string(&item.genres)?;
    Ok(q.bind(item.imdb_id.clone())
        .bind(item.tmdb_id)
        .bind(item.media_type.to_string())
        .bind(item.season)
        .bind(item.episode)
        .bind(item.version.0.clone())
        .bind(item.title.clone())
        .bind(item.year)
        .bind(item.episode_title.clone())
        .bind(item.release_date.map(fmt_date))
        .bind(item.physical_release_date.map(fmt_date))
        .bind(item.runtime_minutes)
        .bind(item.airtime.clone())
        .bind(genres)
        .bind(item.country.clone())
        .bind(item.anime)
        .bind(item.early_release)
        .bind(item.no_early_release)
        .bind(item.content_source.clone())
        .bind(item.content_source_detail.clone())
        .bind(item.requested_season)
        .bind(item.disable_not_wanted_check)
        .bind(item.filled_by_file.clone())
        .bind(item.filled_by_title.clone())
        .bind(item.filled_by_magnet.clone())
        .bind(item.filled_by_torrent_id.clone())
        .bind(item.location_on_disk.clone())
        .bind(item.original_path_for_symlink.clone())
        .bind(item.original_scraped_torrent_title.clone())
        .bind(item.upgrading_from.clone())
        .bind(item.upgrading_from_version.as_ref().map(|v| v.0.clone()))
        .bind(item.upgrading_from_torrent_id.clone())
        .bind(item.upgraded)
        .bind(item.current_score)
        .bind(item.wake_count)
        .bind(item.sleep_cycles)
        .bind(item.last_updated.to_rfc3339())
        .bind(item.collected_at.map(|t| t.to_rfc3339()))
        .bind(item.original_collected_at.map(|t| t.to_rfc3339()))
        .bind(item.blacklisted_date.map(|t| t.to_rfc3339()))
        .bind(item.final_check_add_timestamp.map(|t| t.to_rfc3339()))
        .bind(item.force_priority.clone())
        .bind(item.fall_back_to_single_scraper))
}

fn bind_identity<'q>(q: SqliteQuery<'q>, identity: &ItemIdentity) -> SqliteQuery<'q> {
    q.bind(identity.imdb_id.clone())
        .bind(identity.tmdb_id)
        .bind(identity.media_type.to_string())
        .bind(identity.season)
        .bind(identity.episode)
}

async fn insert_item(pool: &SqlitePool, item: &MediaItem) -> Result<()> {
    let placeholders = std::iter::repeat("?")
        .take(43)
        .collect::<Vec<_>>()
        .join(", ");
    let q = format!(
        "INSERT INTO media_items (id, {ITEM_VALUE_COLUMNS}, state) VALUES (?, {placeholders}, ?)"
    );
    let query = sqlx::query(&q).bind(item.id.to_string());
    bind_item_values(query, item)?
        .bind(item.state.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

async fn update_item(pool: &SqlitePool, item: &MediaItem) -> Result<u64> {
    let q = format!("UPDATE media_items SET {ITEM_UPDATE_SET} WHERE id = ?");
    let result = bind_item_values(sqlx::query(&q), item)?
        .bind(item.state.as_str())
        .bind(item.id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

async fn update_item_from_state(
    pool: &SqlitePool,
    item: &MediaItem,
    from_state: ItemState,
    to_state: ItemState,
) -> Result<u64> {
    let q = format!("UPDATE media_items SET {ITEM_UPDATE_SET} WHERE id = ? AND state = ?");
    let result = bind_item_values(sqlx::query(&q), item)?
        .bind(to_state.as_str())
        .bind(item.id.to_string())
        .bind(from_state.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[async_trait::async_trait]
impl Repository<MediaItem> for SqliteMediaItemRepository {
    async fn create(&self, entity: MediaItem) -> Result<MediaItem> {
        debug!(target: "repository", item_id = %entity.id, title = %entity.title, "creating media item");
        with_write_retry(self.policy, "media_items.insert", || {
            insert_item(&self.pool, &entity)
        })
        .await?;
        Ok(entity)
    }

    async fn get_by_id(&self, id: impl Into<String> + Send) -> Result<Option<MediaItem>> {
        let id = id.into();
        debug!(target: "repository", %id, "fetching media item by id");
        let row = sqlx::query("SELECT * FROM media_items WHERE id = ? LIMIT 1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_media_item).transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<MediaItem>> {
        debug!(target: "repository", limit, offset, "listing media items");
        let rows = sqlx::query("SELECT * FROM media_items ORDER BY title LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_media_item).collect()
    }

    async fn update(&self, entity: MediaItem) -> Result<MediaItem> {
        debug!(target: "repository", item_id = %entity.id, "updating media item");
        with_write_retry(self.policy, "media_items.update", || {
            update_item(&self.pool, &entity)
        })
        .await?;
        Ok(entity)
    }

    async fn delete(&self, id: impl Into<String> + Send) -> Result<()> {
        let id = id.into();
        debug!(target: "repository", %id, "deleting media item");
        with_write_retry(self.policy, "media_items.delete", || {
            let id = id.clone();
            async move {
                sqlx::query("DELETE FROM media_items WHERE id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
        })
        .await
    }
}

#[async_trait::async_trait]
impl MediaItemRepository for SqliteMediaItemRepository {
    async fn upsert_wanted(
        &self,
        batch: Vec<MediaItem>,
        watched: &HashSet<ItemIdentity>,
    ) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        for item in batch {
            let identity = item.identity();
            if watched.contains(&identity) {
                outcome.skipped_watched += 1;
                continue;
            }

            let q = format!("SELECT state, version FROM media_items WHERE {IDENTITY_WHERE}");
            let rows = bind_identity(sqlx::query(&q), &identity)
                .fetch_all(&self.pool)
                .await?;

            let mut skip: Option<&'static str> = None;
            for row in &rows {
                let version: String = row.try_get("version")?;
                if Version::new(version).stripped() != item.version.stripped() {
                    continue;
                }
                let state: String = row.try_get("state")?;
                skip = Some(if state == ItemState::Blacklisted.as_str() {
                    "blacklisted"
                } else {
                    "existing"
                });
                if skip == Some("blacklisted") {
                    break;
                }
            }

            match skip {
                Some("blacklisted") => outcome.skipped_blacklisted += 1,
                Some(_) => outcome.skipped_existing += 1,
                None => {
                    debug!(target: "repository", title = %item.title, version = %item.version.0, "inserting wanted item");
                    with_write_retry(self.policy, "media_items.upsert_wanted", || {
                        insert_item(&self.pool, &item)
                    })
                    .await?;
                    outcome.added += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn transition_state(
        &self,
        item: &MediaItem,
        from_state: ItemState,
        to_state: ItemState,
    ) -> Result<TransitionOutcome> {
        debug!(
            target: "repository",
            item_id = %item.id,
            from = from_state.as_str(),
            to = to_state.as_str(),
            "transitioning media item"
        );
        let affected = with_write_retry(self.policy, "media_items.transition", || {
            update_item_from_state(&self.pool, item, from_state, to_state)
        })
        .await?;
        if affected == 1 {
            Ok(TransitionOutcome::Applied)
        } else {
            warn!(
                target: "repository",
                item_id = %item.id,
                expected = from_state.as_str(),
                "transition skipped, stored state changed underneath"
            );
            Ok(TransitionOutcome::StateMismatch)
        }
    }

    async fn list_by_state(
        &self,
        state: ItemState,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MediaItem>> {
        let rows = sqlx::query(
            "SELECT * FROM media_items WHERE state = ? ORDER BY last_updated LIMIT ? OFFSET ?",
        )
        .bind(state.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_media_item).collect()
    }

    async fn list_ids_by_state(&self, state: ItemState) -> Result<Vec<ItemId>> {
        let rows = sqlx::query("SELECT id FROM media_items WHERE state = ? ORDER BY last_updated")
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            out.push(ItemId::from_uuid(Uuid::parse_str(&id)?));
        }
        Ok(out)
    }

    async fn count_by_state(&self, state: ItemState) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM media_items WHERE state = ?")
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    async fn find_by_identity(&self, identity: &ItemIdentity) -> Result<Vec<MediaItem>> {
        let q = format!("SELECT * FROM media_items WHERE {IDENTITY_WHERE} ORDER BY version");
        let rows = bind_identity(sqlx::query(&q), identity)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_media_item).collect()
    }

    async fn find_collected_by_file(&self, filename: &str) -> Result<Option<MediaItem>> {
        let row = sqlx::query(
            "SELECT * FROM media_items WHERE state = 'collected' AND filled_by_file = ? LIMIT 1",
        )
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_media_item).transpose()
    }

    async fn reconcile_presence(
        &self,
        present: &HashSet<String>,
        rescrape: bool,
    ) -> Result<ReconcileOutcome> {
        let rows = sqlx::query("SELECT * FROM media_items WHERE state = 'collected'")
            .fetch_all(&self.pool)
            .await?;
        let collected: Vec<MediaItem> = rows
            .iter()
            .map(row_to_media_item)
            .collect::<Result<Vec<_>>>()?;

        let mut outcome = ReconcileOutcome::default();
        for item in &collected {
            let missing = match &item.filled_by_file {
                Some(file) => !present.contains(file),
                None => false,
            };
            if !missing {
                continue;
            }

            let other_version_collected = collected.iter().any(|o| {
                o.id != item.id
                    && o.identity() == item.identity()
                    && o.version.stripped() != item.version.stripped()
            });

            if rescrape && !other_version_collected {
                let mut revived = item.clone();
                revived.clear_fulfillment();
                revived.state = ItemState::Wanted;
                revived.last_updated = Utc::now();
                warn!(target: "repository", item_id = %item.id, title = %item.title, "collected file missing, reverting to wanted");
                with_write_retry(self.policy, "media_items.reconcile_revert", || {
                    update_item(&self.pool, &revived)
                })
                .await?;
                outcome.reverted += 1;
            } else {
                warn!(target: "repository", item_id = %item.id, title = %item.title, "collected file missing, deleting row");
                let id = item.id.to_string();
                with_write_retry(self.policy, "media_items.reconcile_delete", || {
                    let id = id.clone();
                    async move {
                        sqlx::query("DELETE FROM media_items WHERE id = ?")
                            .bind(id)
                            .execute(&self.pool)
                            .await?;
                        Ok(())
                    }
                })
                .await?;
                outcome.deleted += 1;
            }
        }
        Ok(outcome)
    }
}

// ============================================================================
// Torrent attempts
// ============================================================================

pub struct SqliteTorrentAttemptRepository {
    pool: SqlitePool,
    policy: WritePolicy,
}

impl SqliteTorrentAttemptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            policy: WritePolicy::default(),
        }
    }

    pub fn with_policy(pool: SqlitePool, policy: WritePolicy) -> Self {
        Self { pool, policy }
    }
}

#[async_trait::async_trait]
impl TorrentAttemptRepository for SqliteTorrentAttemptRepository {
    async fn append(&self, attempt: TorrentAttempt) -> Result<TorrentAttempt> {
        debug!(
            target: "repository",
            item_id = %attempt.item_id,
            hash = %attempt.torrent_hash,
            outcome = attempt.outcome.as_str(),
            "recording torrent attempt"
        );
        with_write_retry(self.policy, "torrent_attempts.insert", || async {
            sqlx::query(
                "INSERT INTO torrent_attempts (id, item_id, torrent_hash, title, rationale, outcome, added_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(attempt.id.to_string())
            .bind(attempt.item_id.to_string())
            .bind(attempt.torrent_hash.to_lowercase())
            .bind(attempt.title.clone())
            .bind(attempt.rationale.clone())
            .bind(attempt.outcome.as_str())
            .bind(attempt.added_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;
        Ok(attempt)
    }

    async fn list_for_item(&self, item_id: ItemId) -> Result<Vec<TorrentAttempt>> {
        let rows =
            sqlx::query("SELECT * FROM torrent_attempts WHERE item_id = ? ORDER BY added_at")
                .bind(item_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_attempt).collect()
    }

    async fn is_hash_rejected(&self, torrent_hash: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM torrent_attempts \
             WHERE torrent_hash = ? AND outcome IN ('blacklisted', 'failed')",
        )
        .bind(torrent_hash.to_lowercase())
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }

    async fn delete_for_item(&self, item_id: ItemId) -> Result<u64> {
        let result = with_write_retry(self.policy, "torrent_attempts.delete", || async {
            let r = sqlx::query("DELETE FROM torrent_attempts WHERE item_id = ?")
                .bind(item_id.to_string())
                .execute(&self.pool)
                .await?;
            Ok(r)
        })
        .await?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// TV shows
// ============================================================================

pub struct SqliteTvShowRepository {
    pool: SqlitePool,
    policy: WritePolicy,
}

impl SqliteTvShowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            policy: WritePolicy::default(),
        }
    }
}

#[async_trait::async_trait]
impl TvShowRepository for SqliteTvShowRepository {
    async fn upsert(&self, show: TvShow) -> Result<TvShow> {
        debug!(target: "repository", show_id = %show.id, title = %show.title, "upserting tv show");
        let episodes = serde_json::to_string(&show.episodes_per_season)?;
        with_write_retry(self.policy, "tv_shows.upsert", || {
            let episodes = episodes.clone();
            let show = &show;
            async move {
                sqlx::query(
                    "INSERT INTO tv_shows (id, imdb_id, tmdb_id, title, year, anime, episodes_per_season, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
                     ON CONFLICT (id) DO UPDATE SET \
                        imdb_id = excluded.imdb_id, tmdb_id = excluded.tmdb_id, title = excluded.title, \
                        year = excluded.year, anime = excluded.anime, \
                        episodes_per_season = excluded.episodes_per_season, updated_at = excluded.updated_at",
                )
                .bind(show.id.to_string())
                .bind(show.imdb_id.clone())
                .bind(show.tmdb_id)
                .bind(show.title.clone())
                .bind(show.year)
                .bind(show.anime)
                .bind(episodes)
                .bind(show.created_at.to_rfc3339())
                .bind(show.updated_at.to_rfc3339())
                .execute(&self.pool)
                .await?;
                Ok(())
            }
        })
        .await?;
        Ok(show)
    }

    async fn get_by_imdb_id(&self, imdb_id: &str) -> Result<Option<TvShow>> {
        let row = sqlx::query("SELECT * FROM tv_shows WHERE imdb_id = ? LIMIT 1")
            .bind(imdb_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_tv_show).transpose()
    }

    async fn set_version_status(&self, status: TvShowVersionStatus) -> Result<()> {
        with_write_retry(self.policy, "tv_show_version_status.upsert", || {
            let status = &status;
            async move {
                sqlx::query(
                    "INSERT INTO tv_show_version_status (show_id, version, total_episodes, collected_episodes, updated_at) \
                     VALUES (?, ?, ?, ?, ?) \
                     ON CONFLICT (show_id, version) DO UPDATE SET \
                        total_episodes = excluded.total_episodes, \
                        collected_episodes = excluded.collected_episodes, \
                        updated_at = excluded.updated_at",
                )
                .bind(status.show_id.to_string())
                .bind(status.version.0.clone())
                .bind(status.total_episodes)
                .bind(status.collected_episodes)
                .bind(status.updated_at.to_rfc3339())
                .execute(&self.pool)
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn list_version_status(&self, show_id: ShowId) -> Result<Vec<TvShowVersionStatus>> {
        let rows = sqlx::query(
            "SELECT * FROM tv_show_version_status WHERE show_id = ? ORDER BY version",
        )
        .bind(show_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let show_id_str: String = row.try_get("show_id")?;
            out.push(TvShowVersionStatus {
                show_id: ShowId::from_uuid(Uuid::parse_str(&show_id_str)?),
                version: Version::new(row.try_get::<String, _>("version")?),
                total_episodes: row.try_get::<i64, _>("total_episodes")? as u32,
                collected_episodes: row.try_get::<i64, _>("collected_episodes")? as u32,
                updated_at: parse_dt(row.try_get("updated_at")?)?,
            });
        }
        Ok(out)
    }
}

// ============================================================================
// Statistics
// ============================================================================

pub struct SqliteStatisticsRepository {
    pool: SqlitePool,
    policy: WritePolicy,
}

impl SqliteStatisticsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            policy: WritePolicy::default(),
        }
    }
}

#[async_trait::async_trait]
impl StatisticsRepository for SqliteStatisticsRepository {
    async fn refresh(&self) -> Result<StatisticsSummary> {
        debug!(target: "repository", "refreshing statistics summary");
        let row = sqlx::query(
            "SELECT \
                SUM(media_type = 'movie') AS total_movies, \
                SUM(media_type = 'episode') AS total_episodes, \
                SUM(media_type = 'movie' AND state = 'collected') AS collected_movies, \
                SUM(media_type = 'episode' AND state = 'collected') AS collected_episodes, \
                SUM(upgraded) AS upgraded_items, \
                MAX(collected_at) AS latest_collected_at, \
                MAX(CASE WHEN upgraded THEN collected_at END) AS latest_upgraded_at \
             FROM media_items",
        )
        .fetch_one(&self.pool)
        .await?;

        let shows = sqlx::query("SELECT COUNT(*) AS n FROM tv_shows")
            .fetch_one(&self.pool)
            .await?;

        let summary = StatisticsSummary {
            total_movies: row.try_get::<Option<i64>, _>("total_movies")?.unwrap_or(0) as u64,
            total_shows: shows.try_get::<i64, _>("n")? as u64,
            total_episodes: row.try_get::<Option<i64>, _>("total_episodes")?.unwrap_or(0) as u64,
            collected_movies: row
                .try_get::<Option<i64>, _>("collected_movies")?
                .unwrap_or(0) as u64,
            collected_episodes: row
                .try_get::<Option<i64>, _>("collected_episodes")?
                .unwrap_or(0) as u64,
            upgraded_items: row.try_get::<Option<i64>, _>("upgraded_items")?.unwrap_or(0) as u64,
            latest_collected_at: row
                .try_get::<Option<String>, _>("latest_collected_at")?
                .map(parse_dt)
                .transpose()?,
            latest_upgraded_at: row
                .try_get::<Option<String>, _>("latest_upgraded_at")?
                .map(parse_dt)
                .transpose()?,
            refreshed_at: Some(Utc::now()),
        };

        with_write_retry(self.policy, "statistics_summary.replace", || {
            let s = &summary;
            async move {
                sqlx::query(
                    "INSERT OR REPLACE INTO statistics_summary \
                     (id, total_movies, total_shows, total_episodes, collected_movies, collected_episodes, \
                      upgraded_items, latest_collected_at, latest_upgraded_at, refreshed_at) \
                     VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(s.total_movies as i64)
                .bind(s.total_shows as i64)
                .bind(s.total_episodes as i64)
                .bind(s.collected_movies as i64)
                .bind(s.collected_episodes as i64)
                .bind(s.upgraded_items as i64)
                .bind(s.latest_collected_at.map(|t| t.to_rfc3339()))
                .bind(s.latest_upgraded_at.map(|t| t.to_rfc3339()))
                .bind(s.refreshed_at.map(|t| t.to_rfc3339()))
                .execute(&self.pool)
                .await?;
                Ok(())
            }
        })
        .await?;

        Ok(summary)
    }

    async fn get(&self) -> Result<StatisticsSummary> {
        let row = sqlx::query("SELECT * FROM statistics_summary WHERE id = 1 LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(StatisticsSummary::default());
        };
        Ok(StatisticsSummary {
            total_movies: row.try_get::<i64, _>("total_movies")? as u64,
            total_shows: row.try_get::<i64, _>("total_shows")? as u64,
            total_episodes: row.try_get::<i64, _>("total_episodes")? as u64,
            collected_movies: row.try_get::<i64, _>("collected_movies")? as u64,
            collected_episodes: row.try_get::<i64, _>("collected_episodes")? as u64,
            upgraded_items: row.try_get::<i64, _>("upgraded_items")? as u64,
            latest_collected_at: row
                .try_get::<Option<String>, _>("latest_collected_at")?
                .map(parse_dt)
                .transpose()?,
            latest_upgraded_at: row
                .try_get::<Option<String>, _>("latest_upgraded_at")?
                .map(parse_dt)
                .transpose()?,
            refreshed_at: row
                .try_get::<Option<String>, _>("refreshed_at")?
                .map(parse_dt)
                .transpose()?,
        })
    }
}

// ============================================================================
// Notifications
// ============================================================================

pub struct SqliteNotificationRepository {
    pool: SqlitePool,
    policy: WritePolicy,
}

impl SqliteNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            policy: WritePolicy::default(),
        }
    }
}

#[async_trait::async_trait]
impl NotificationRepository for SqliteNotificationRepository {
    async fn append(&self, notification: Notification) -> Result<Notification> {
        with_write_retry(self.policy, "notifications.insert", || {
            let n = &notification;
            async move {
                sqlx::query(
                    "INSERT INTO notifications (id, item_id, from_state, to_state, title, created_at, sent_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(n.id.to_string())
                .bind(n.item_id.to_string())
                .bind(n.from_state.as_str())
                .bind(n.to_state.as_str())
                .bind(n.title.clone())
                .bind(n.created_at.to_rfc3339())
                .bind(n.sent_at.map(|t| t.to_rfc3339()))
                .execute(&self.pool)
                .await?;
                Ok(())
            }
        })
        .await?;
        Ok(notification)
    }

    async fn list_unsent(&self, limit: i64) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE sent_at IS NULL ORDER BY created_at LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_notification).collect()
    }

    async fn mark_sent(&self, ids: &[NotificationId]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        for id in ids {
            with_write_retry(self.policy, "notifications.mark_sent", || {
                let now = now.clone();
                async move {
                    sqlx::query("UPDATE notifications SET sent_at = ? WHERE id = ?")
                        .bind(now)
                        .bind(id.to_string())
                        .execute(&self.pool)
                        .await?;
                    Ok(())
                }
            })
            .await?;
        }
        Ok(())
    }

    async fn delete(&self, id: NotificationId) -> Result<()> {
        with_write_retry(self.policy, "notifications.delete", || async {
            sqlx::query("DELETE FROM notifications WHERE id = ?")
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }
}

// ============================================================================
// Row mapping helpers
// ============================================================================

fn parse_dt(s: String) -> Result<DateTime<Utc>> {
    // Try RFC3339 first
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Fallback to SQLite default CURRENT_TIMESTAMP format: "YYYY-MM-DD HH:MM:SS"
    let ndt = NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
}

fn parse_dt_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_dt).transpose()
}

fn parse_date_opt(s: Option<String>) -> Result<Option<NaiveDate>> {
    s.map(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").map_err(Into::into))
        .transpose()
}

fn parse_media_type(s: &str) -> Result<MediaType> {
    match s {
        "movie" => Ok(MediaType::Movie),
        "episode" => Ok(MediaType::Episode),
        other => Err(anyhow!("unknown media type: {other}")),
    }
}

fn row_to_media_item(row: &sqlx::sqlite::SqliteRow) -> Result<MediaItem> {
    let id: String = row.try_get("id")?;
    let state: String = row.try_get("state")?;
    let media_type: String = row.try_get("media_type")?;
    let genres: String = row.try_get("genres")?;

    Ok(MediaItem {
        id: ItemId::from_uuid(Uuid::parse_str(&id)?),
        imdb_id: row.try_get("imdb_id")?,
        tmdb_id: row.try_get("tmdb_id")?,
        media_type: parse_media_type(&media_type)?,
        season: row.try_get("season")?,
        episode: row.try_get("episode")?,
        version: Version::new(row.try_get::<String, _>("version")?),
        title: row.try_get("title")?,
        year: row.try_get("year")?,
        episode_title: row.try_get("episode_title")?,
        release_date: parse_date_opt(row.try_get("release_date")?)?,
        physical_release_date: parse_date_opt(row.try_get("physical_release_date")?)?,
        runtime_minutes: row
            .try_get::<Option<i64>, _>("runtime_minutes")?
            .map(|v| v as u32),
        airtime: row.try_get("airtime")?,
        genres: serde_json::from_str(&genres)?,
        country: row.try_get("country")?,
        anime: row.try_get("anime")?,
        early_release: row.try_get("early_release")?,
        no_early_release: row.try_get("no_early_release")?,
        content_source: row.try_get("content_source")?,
        content_source_detail: row.try_get("content_source_detail")?,
        requested_season: row.try_get("requested_season")?,
        disable_not_wanted_check: row.try_get("disable_not_wanted_check")?,
        state: ItemState::parse(&state).ok_or_else(|| anyhow!("unknown item state: {state}"))?,
        filled_by_file: row.try_get("filled_by_file")?,
        filled_by_title: row.try_get("filled_by_title")?,
        filled_by_magnet: row.try_get("filled_by_magnet")?,
        filled_by_torrent_id: row.try_get("filled_by_torrent_id")?,
        location_on_disk: row.try_get("location_on_disk")?,
        original_path_for_symlink: row.try_get("original_path_for_symlink")?,
        original_scraped_torrent_title: row.try_get("original_scraped_torrent_title")?,
        upgrading_from: row.try_get("upgrading_from")?,
        upgrading_from_version: row
            .try_get::<Option<String>, _>("upgrading_from_version")?
            .map(Version::new),
        upgrading_from_torrent_id: row.try_get("upgrading_from_torrent_id")?,
        upgraded: row.try_get("upgraded")?,
        current_score: row.try_get("current_score")?,
        wake_count: row.try_get::<i64, _>("wake_count")? as u32,
        sleep_cycles: row.try_get::<i64, _>("sleep_cycles")? as u32,
        last_updated: parse_dt(row.try_get("last_updated")?)?,
        collected_at: parse_dt_opt(row.try_get("collected_at")?)?,
        original_collected_at: parse_dt_opt(row.try_get("original_collected_at")?)?,
        blacklisted_date: parse_dt_opt(row.try_get("blacklisted_date")?)?,
        final_check_add_timestamp: parse_dt_opt(row.try_get("final_check_add_timestamp")?)?,
        force_priority: row.try_get("force_priority")?,
        fall_back_to_single_scraper: row.try_get("fall_back_to_single_scraper")?,
    })
}

fn row_to_attempt(row: &sqlx::sqlite::SqliteRow) -> Result<TorrentAttempt> {
    let id: String = row.try_get("id")?;
    let item_id: String = row.try_get("item_id")?;
    let outcome: String = row.try_get("outcome")?;
    Ok(TorrentAttempt {
        id: AttemptId::from_uuid(Uuid::parse_str(&id)?),
        item_id: ItemId::from_uuid(Uuid::parse_str(&item_id)?),
        torrent_hash: row.try_get("torrent_hash")?,
        title: row.try_get("title")?,
        rationale: row.try_get("rationale")?,
        outcome: AttemptOutcome::parse(&outcome)
            .ok_or_else(|| anyhow!("unknown attempt outcome: {outcome}"))?,
        added_at: parse_dt(row.try_get("added_at")?)?,
    })
}

fn row_to_tv_show(row: &sqlx::sqlite::SqliteRow) -> Result<TvShow> {
    let id: String = row.try_get("id")?;
    let episodes: String = row.try_get("episodes_per_season")?;
    Ok(TvShow {
        id: ShowId::from_uuid(Uuid::parse_str(&id)?),
        imdb_id: row.try_get("imdb_id")?,
        tmdb_id: row.try_get("tmdb_id")?,
        title: row.try_get("title")?,
        year: row.try_get("year")?,
        anime: row.try_get("anime")?,
        episodes_per_season: serde_json::from_str(&episodes)?,
        created_at: parse_dt(row.try_get("created_at")?)?,
        updated_at: parse_dt(row.try_get("updated_at")?)?,
    })
}

fn row_to_notification(row: &sqlx::sqlite::SqliteRow) -> Result<Notification> {
    let id: String = row.try_get("id")?;
    let item_id: String = row.try_get("item_id")?;
    let from_state: String = row.try_get("from_state")?;
    let to_state: String = row.try_get("to_state")?;
    Ok(Notification {
        id: NotificationId::from_uuid(Uuid::parse_str(&id)?),
        item_id: ItemId::from_uuid(Uuid::parse_str(&item_id)?),
        from_state: ItemState::parse(&from_state)
            .ok_or_else(|| anyhow!("unknown item state: {from_state}"))?,
        to_state: ItemState::parse(&to_state)
            .ok_or_else(|| anyhow!("unknown item state: {to_state}"))?,
        title: row.try_get("title")?,
        created_at: parse_dt(row.try_get("created_at")?)?,
        sent_at: parse_dt_opt(row.try_get("sent_at")?)?,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use fetcharr_domain::{ItemState, MediaItem, Version};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory sqlite");

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .expect("migrate");
        pool
    }

    fn wanted_movie(title: &str, version: &str) -> MediaItem {
        let mut item = MediaItem::new_movie(title, Version::new(version));
        item.imdb_id = Some("tt0111161".to_string());
        item.year = Some(1994);
        item.genres = vec!["drama".to_string()];
        item.content_source = "trakt_watchlist".to_string();
        item
    }

    #[tokio::test]
    async fn media_item_create_and_get_round_trip() {
        let pool = setup_pool().await;
        let repo = SqliteMediaItemRepository::new(pool.clone());

        let item = wanted_movie("The Shawshank Redemption", "1080p");
        let id = item.id;
        repo.create(item).await.expect("create item");

        let fetched = repo
            .get_by_id(id.to_string())
            .await
            .expect("fetch item")
            .expect("item exists");
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.title, "The Shawshank Redemption");
        assert_eq!(fetched.imdb_id.as_deref(), Some("tt0111161"));
        assert_eq!(fetched.year, Some(1994));
        assert_eq!(fetched.genres, vec!["drama".to_string()]);
        assert_eq!(fetched.state, ItemState::Wanted);
        assert_eq!(fetched.version.0, "1080p");
    }

    #[tokio::test]
    async fn upsert_wanted_skips_existing_blacklisted_and_watched() {
        let pool = setup_pool().await;
        let repo = SqliteMediaItemRepository::new(pool.clone());

        // Pre-existing row in a non-terminal state.
        let existing = wanted_movie("The Shawshank Redemption", "1080p");
        repo.create(existing.clone()).await.expect("create");

        // Blacklisted row for a different movie.
        let mut blacklisted = wanted_movie("The Room", "1080p");
        blacklisted.imdb_id = Some("tt0368226".to_string());
        blacklisted.state = ItemState::Blacklisted;
        repo.create(blacklisted.clone()).await.expect("create");

        let mut watched_item = wanted_movie("Heat", "1080p");
        watched_item.imdb_id = Some("tt0113277".to_string());
        let mut watched = HashSet::new();
        watched.insert(watched_item.identity());

        let mut fresh = wanted_movie("Se7en", "1080p");
        fresh.imdb_id = Some("tt0114369".to_string());

        // Tentative marker strips to the same profile name as the existing row.
        let mut tentative_dup = wanted_movie("The Shawshank Redemption", "1080p*");

        let mut blacklisted_dup = wanted_movie("The Room", "1080p");
        blacklisted_dup.imdb_id = Some("tt0368226".to_string());

        tentative_dup.id = ItemId::new();
        blacklisted_dup.id = ItemId::new();

        let outcome = repo
            .upsert_wanted(
                vec![tentative_dup, blacklisted_dup, watched_item, fresh],
                &watched,
            )
            .await
            .expect("upsert");

        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.skipped_existing, 1);
        assert_eq!(outcome.skipped_blacklisted, 1);
        assert_eq!(outcome.skipped_watched, 1);
    }

    #[tokio::test]
    async fn transition_state_is_conditional_on_source_state() {
        let pool = setup_pool().await;
        let repo = SqliteMediaItemRepository::new(pool.clone());

        let mut item = wanted_movie("Alien", "1080p");
        item.imdb_id = Some("tt0078748".to_string());
        repo.create(item.clone()).await.expect("create");

        item.state = ItemState::Scraping;
        let first = repo
            .transition_state(&item, ItemState::Wanted, ItemState::Scraping)
            .await
            .expect("transition");
        assert_eq!(first, TransitionOutcome::Applied);

        // Stored state is now Scraping, so the same precondition fails.
        let second = repo
            .transition_state(&item, ItemState::Wanted, ItemState::Scraping)
            .await
            .expect("transition");
        assert_eq!(second, TransitionOutcome::StateMismatch);

        let stored = repo
            .get_by_id(item.id.to_string())
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(stored.state, ItemState::Scraping);
    }

    #[tokio::test]
    async fn reconcile_presence_reverts_or_deletes_missing_files() {
        let pool = setup_pool().await;
        let repo = SqliteMediaItemRepository::new(pool.clone());

        let mut kept = wanted_movie("Alien", "1080p");
        kept.imdb_id = Some("tt0078748".to_string());
        kept.state = ItemState::Collected;
        kept.filled_by_file = Some("Alien.1979.1080p.mkv".to_string());
        repo.create(kept.clone()).await.expect("create");

        let mut missing = wanted_movie("Blade Runner", "1080p");
        missing.imdb_id = Some("tt0083658".to_string());
        missing.state = ItemState::Collected;
        missing.filled_by_file = Some("Blade.Runner.1982.1080p.mkv".to_string());
        repo.create(missing.clone()).await.expect("create");

        let mut present = HashSet::new();
        present.insert("Alien.1979.1080p.mkv".to_string());

        let outcome = repo
            .reconcile_presence(&present, true)
            .await
            .expect("reconcile");
        assert_eq!(outcome.reverted, 1);
        assert_eq!(outcome.deleted, 0);

        let revived = repo
            .get_by_id(missing.id.to_string())
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(revived.state, ItemState::Wanted);
        assert!(revived.filled_by_file.is_none());

        // With rescrape off the row is deleted instead.
        let mut gone = wanted_movie("The Thing", "1080p");
        gone.imdb_id = Some("tt0084787".to_string());
        gone.state = ItemState::Collected;
        gone.filled_by_file = Some("The.Thing.1982.1080p.mkv".to_string());
        repo.create(gone.clone()).await.expect("create");

        let outcome = repo
            .reconcile_presence(&present, false)
            .await
            .expect("reconcile");
        assert_eq!(outcome.deleted, 1);
        assert!(repo
            .get_by_id(gone.id.to_string())
            .await
            .expect("fetch")
            .is_none());
    }

    #[tokio::test]
    async fn attempt_log_flags_rejected_hashes() {
        let pool = setup_pool().await;
        let items = SqliteMediaItemRepository::new(pool.clone());
        let attempts = SqliteTorrentAttemptRepository::new(pool.clone());

        let item = wanted_movie("Alien", "1080p");
        items.create(item.clone()).await.expect("create item");

        let attempt = TorrentAttempt {
            id: AttemptId::new(),
            item_id: item.id,
            torrent_hash: "AE94F4F0A4C51E5D8B7F8A9C3D2E1F0A9B8C7D6E".to_string(),
            title: "Alien 1979 1080p BluRay x264".to_string(),
            rationale: "infringing per provider".to_string(),
            outcome: AttemptOutcome::Blacklisted,
            added_at: Utc::now(),
        };
        attempts.append(attempt).await.expect("append");

        // Lookup is case-insensitive because hashes are stored lowercased.
        assert!(attempts
            .is_hash_rejected("ae94f4f0a4c51e5d8b7f8a9c3d2e1f0a9b8c7d6e")
            .await
            .expect("lookup"));
        assert!(!attempts
            .is_hash_rejected("0000000000000000000000000000000000000000")
            .await
            .expect("lookup"));

        let listed = attempts.list_for_item(item.id).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].outcome, AttemptOutcome::Blacklisted);
    }

    #[tokio::test]
    async fn notifications_outbox_marks_sent() {
        let pool = setup_pool().await;
        let repo = SqliteNotificationRepository::new(pool.clone());

        let notification = Notification {
            id: NotificationId::new(),
            item_id: ItemId::new(),
            from_state: ItemState::Checking,
            to_state: ItemState::Collected,
            title: "Alien".to_string(),
            created_at: Utc::now(),
            sent_at: None,
        };
        let id = notification.id;
        repo.append(notification).await.expect("append");

        let unsent = repo.list_unsent(10).await.expect("list");
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].to_state, ItemState::Collected);

        repo.mark_sent(&[id]).await.expect("mark sent");
        assert!(repo.list_unsent(10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn statistics_refresh_counts_collected_rows() {
        let pool = setup_pool().await;
        let items = SqliteMediaItemRepository::new(pool.clone());
        let stats = SqliteStatisticsRepository::new(pool.clone());

        let mut collected = wanted_movie("Alien", "1080p");
        collected.state = ItemState::Collected;
        collected.collected_at = Some(Utc::now());
        items.create(collected).await.expect("create");

        let mut pending = wanted_movie("Blade Runner", "1080p");
        pending.imdb_id = Some("tt0083658".to_string());
        items.create(pending).await.expect("create");

        let summary = stats.refresh().await.expect("refresh");
        assert_eq!(summary.total_movies, 2);
        assert_eq!(summary.collected_movies, 1);
        assert_eq!(summary.upgraded_items, 0);
        assert!(summary.latest_collected_at.is_some());

        let fetched = stats.get().await.expect("get");
        assert_eq!(fetched.total_movies, 2);
        assert_eq!(fetched.collected_movies, 1);
    }
}
