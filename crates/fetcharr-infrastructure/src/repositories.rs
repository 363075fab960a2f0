// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::Result;
use fetcharr_domain::{
    ItemId, ItemIdentity, ItemState, MediaItem, Notification, NotificationId, ShowId,
    StatisticsSummary, TorrentAttempt, TvShow, TvShowVersionStatus,
};
use std::collections::HashSet;

// ============================================================================
// Repository Traits
// ============================================================================

/// Counts reported by a wanted-batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub added: usize,
    pub skipped_existing: usize,
    pub skipped_blacklisted: usize,
    pub skipped_watched: usize,
}

/// Result of a conditional state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The row's state no longer matched the expected source state.
    StateMismatch,
}

impl TransitionOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Counts reported by a collected-file reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub reverted: usize,
    pub deleted: usize,
}

/// Generic repository for CRUD operations on a domain entity
#[async_trait::async_trait]
pub trait Repository<T>: Send + Sync {
    async fn create(&self, entity: T) -> Result<T>;
    async fn get_by_id(&self, id: impl Into<String> + Send) -> Result<Option<T>>;
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<T>>;
    async fn update(&self, entity: T) -> Result<T>;
    async fn delete(&self, id: impl Into<String> + Send) -> Result<()>;
}

/// Media item repository with the queue and lifecycle queries
#[async_trait::async_trait]
pub trait MediaItemRepository: Repository<MediaItem> {
    /// Inserts the wanted rows that are genuinely new. A row is skipped when
    /// the same identity + stripped version already exists in any
    /// non-terminal state or as Collected, when a Blacklisted row with that
    /// identity + version exists, or when the identity is in `watched`.
    async fn upsert_wanted(
        &self,
        batch: Vec<MediaItem>,
        watched: &HashSet<ItemIdentity>,
    ) -> Result<UpsertOutcome>;

    /// Writes the item and moves it to `to_state`, but only while the stored
    /// row is still in `from_state`.
    async fn transition_state(
        &self,
        item: &MediaItem,
        from_state: ItemState,
        to_state: ItemState,
    ) -> Result<TransitionOutcome>;

    async fn list_by_state(
        &self,
        state: ItemState,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MediaItem>>;
    async fn list_ids_by_state(&self, state: ItemState) -> Result<Vec<ItemId>>;
    async fn count_by_state(&self, state: ItemState) -> Result<i64>;

    async fn find_by_identity(&self, identity: &ItemIdentity) -> Result<Vec<MediaItem>>;
    async fn find_collected_by_file(&self, filename: &str) -> Result<Option<MediaItem>>;

    /// For every Collected row, verifies its file is still in `present`.
    /// Missing files either revert the row to Wanted (when `rescrape` is on
    /// and no other Collected version of the identity remains) or delete it.
    async fn reconcile_presence(
        &self,
        present: &HashSet<String>,
        rescrape: bool,
    ) -> Result<ReconcileOutcome>;
}

/// Append-only audit log of torrents handed to the debrid provider
#[async_trait::async_trait]
pub trait TorrentAttemptRepository: Send + Sync {
    async fn append(&self, attempt: TorrentAttempt) -> Result<TorrentAttempt>;
    async fn list_for_item(&self, item_id: ItemId) -> Result<Vec<TorrentAttempt>>;
    /// True when the hash was ever recorded as blacklisted or failed.
    async fn is_hash_rejected(&self, torrent_hash: &str) -> Result<bool>;
    async fn delete_for_item(&self, item_id: ItemId) -> Result<u64>;
}

/// Show-level metadata keyed by external id
#[async_trait::async_trait]
pub trait TvShowRepository: Send + Sync {
    async fn upsert(&self, show: TvShow) -> Result<TvShow>;
    async fn get_by_imdb_id(&self, imdb_id: &str) -> Result<Option<TvShow>>;
    async fn set_version_status(&self, status: TvShowVersionStatus) -> Result<()>;
    async fn list_version_status(&self, show_id: ShowId) -> Result<Vec<TvShowVersionStatus>>;
}

/// Single-row statistics cache
#[async_trait::async_trait]
pub trait StatisticsRepository: Send + Sync {
    /// Recomputes the aggregates from the item tables and stores them.
    async fn refresh(&self) -> Result<StatisticsSummary>;
    async fn get(&self) -> Result<StatisticsSummary>;
}

/// Outbox of state-change notifications
#[async_trait::async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn append(&self, notification: Notification) -> Result<Notification>;
    async fn list_unsent(&self, limit: i64) -> Result<Vec<Notification>>;
    async fn mark_sent(&self, ids: &[NotificationId]) -> Result<()>;
    async fn delete(&self, id: NotificationId) -> Result<()>;
}
