// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Value Objects & IDs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub Uuid);

impl AttemptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShowId(pub Uuid);

impl ShowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ShowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ShowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub Uuid);

impl NotificationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Episode,
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Movie => write!(f, "movie"),
            Self::Episode => write!(f, "episode"),
        }
    }
}

/// Lifecycle state of a media item. `Collected` and `Blacklisted` are
/// terminal; a `Collected` item may still re-enter `Upgrading` while its
/// upgrade window is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Wanted,
    Scraping,
    Adding,
    Checking,
    Sleeping,
    Unreleased,
    PendingUncached,
    Upgrading,
    Collected,
    Blacklisted,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Collected | Self::Blacklisted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wanted => "wanted",
            Self::Scraping => "scraping",
            Self::Adding => "adding",
            Self::Checking => "checking",
            Self::Sleeping => "sleeping",
            Self::Unreleased => "unreleased",
            Self::PendingUncached => "pending_uncached",
            Self::Upgrading => "upgrading",
            Self::Collected => "collected",
            Self::Blacklisted => "blacklisted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "wanted" => Some(Self::Wanted),
            "scraping" => Some(Self::Scraping),
            "adding" => Some(Self::Adding),
            "checking" => Some(Self::Checking),
            "sleeping" => Some(Self::Sleeping),
            "unreleased" => Some(Self::Unreleased),
            "pending_uncached" => Some(Self::PendingUncached),
            "upgrading" => Some(Self::Upgrading),
            "collected" => Some(Self::Collected),
            "blacklisted" => Some(Self::Blacklisted),
            _ => None,
        }
    }

    /// Every non-terminal state drained by a queue worker.
    pub fn queue_states() -> &'static [ItemState] {
        &[
            Self::Wanted,
            Self::Scraping,
            Self::Adding,
            Self::Checking,
            Self::Sleeping,
            Self::Unreleased,
            Self::PendingUncached,
            Self::Upgrading,
        ]
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Video resolution classes in ascending quality order. The derived `Ord`
/// is relied on by the selector's resolution operator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Resolution {
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "480p")]
    R480p,
    #[serde(rename = "720p")]
    R720p,
    #[serde(rename = "1080p")]
    R1080p,
    #[serde(rename = "2160p")]
    R2160p,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::R480p => "480p",
            Self::R720p => "720p",
            Self::R1080p => "1080p",
            Self::R2160p => "2160p",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "480p" | "480" | "sd" => Self::R480p,
            "720p" | "720" => Self::R720p,
            "1080p" | "1080" | "fhd" => Self::R1080p,
            "2160p" | "2160" | "4k" | "uhd" => Self::R2160p,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Comparison operator applied between a candidate's resolution and the
/// profile's `max_resolution`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionWanted {
    Equal,
    AtMost,
    AtLeast,
}

impl ResolutionWanted {
    pub fn matches(&self, candidate: Resolution, wanted: Resolution) -> bool {
        match self {
            Self::Equal => candidate == wanted,
            Self::AtMost => candidate <= wanted,
            Self::AtLeast => candidate >= wanted,
        }
    }
}

impl Default for ResolutionWanted {
    fn default() -> Self {
        Self::AtMost
    }
}

/// Outcome recorded on the append-only torrent attempt log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Added,
    Cached,
    Uncached,
    Rejected,
    Blacklisted,
    Failed,
    Upgraded,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Cached => "cached",
            Self::Uncached => "uncached",
            Self::Rejected => "rejected",
            Self::Blacklisted => "blacklisted",
            Self::Failed => "failed",
            Self::Upgraded => "upgraded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "added" => Some(Self::Added),
            "cached" => Some(Self::Cached),
            "uncached" => Some(Self::Uncached),
            "rejected" => Some(Self::Rejected),
            "blacklisted" => Some(Self::Blacklisted),
            "failed" => Some(Self::Failed),
            "upgraded" => Some(Self::Upgraded),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Version
// ============================================================================

/// Named quality/filter profile reference carried on every item. A trailing
/// `*` marks a tentative match produced by the reverse parser, `**` marks a
/// fallback assignment; both strip away for identity purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version(pub String);

impl Version {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn is_fallback(&self) -> bool {
        self.0.ends_with("**")
    }

    pub fn is_tentative(&self) -> bool {
        self.0.ends_with('*') && !self.is_fallback()
    }

    /// Profile name without tentative/fallback markers.
    pub fn stripped(&self) -> &str {
        self.0.trim_end_matches('*')
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Canonical identity of a wanted target. Two non-terminal rows may never
/// share an identity with the same stripped version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemIdentity {
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<i64>,
    pub media_type: MediaType,
    pub season: Option<i32>,
    pub episode: Option<i32>,
}

impl ItemIdentity {
    pub fn movie(imdb_id: Option<String>, tmdb_id: Option<i64>) -> Self {
        Self {
            imdb_id,
            tmdb_id,
            media_type: MediaType::Movie,
            season: None,
            episode: None,
        }
    }

    pub fn episode(
        imdb_id: Option<String>,
        tmdb_id: Option<i64>,
        season: i32,
        episode: i32,
    ) -> Self {
        Self {
            imdb_id,
            tmdb_id,
            media_type: MediaType::Episode,
            season: Some(season),
            episode: Some(episode),
        }
    }

    /// Whether two identities point at the same target. Either external id
    /// is sufficient; season/episode must agree for episodes.
    pub fn same_target(&self, other: &ItemIdentity) -> bool {
        if self.media_type != other.media_type {
            return false;
        }
        let id_match = match (&self.imdb_id, &other.imdb_id) {
            (Some(a), Some(b)) => a == b,
            _ => match (self.tmdb_id, other.tmdb_id) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        };
        id_match && self.season == other.season && self.episode == other.episode
    }
}

// ============================================================================
// Entities
// ============================================================================

/// The central entity: one row per (movie | episode, version) target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: ItemId,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<i64>,
    pub media_type: MediaType,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub version: Version,

    pub title: String,
    pub year: Option<i32>,
    pub episode_title: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub physical_release_date: Option<NaiveDate>,
    pub runtime_minutes: Option<u32>,
    pub airtime: Option<String>,
    pub genres: Vec<String>,
    pub country: Option<String>,
    pub anime: bool,
    pub early_release: bool,
    /// Suppresses early-release signals and upgrade sweeps for this item.
    pub no_early_release: bool,

    pub content_source: String,
    pub content_source_detail: Option<String>,
    pub requested_season: Option<i32>,
    pub disable_not_wanted_check: bool,

    pub state: ItemState,
    pub filled_by_file: Option<String>,
    pub filled_by_title: Option<String>,
    pub filled_by_magnet: Option<String>,
    pub filled_by_torrent_id: Option<String>,
    pub location_on_disk: Option<String>,
    pub original_path_for_symlink: Option<String>,
    pub original_scraped_torrent_title: Option<String>,
    pub upgrading_from: Option<String>,
    pub upgrading_from_version: Option<Version>,
    pub upgrading_from_torrent_id: Option<String>,
    pub upgraded: bool,
    pub current_score: Option<i32>,

    pub wake_count: u32,
    pub sleep_cycles: u32,
    pub last_updated: DateTime<Utc>,
    pub collected_at: Option<DateTime<Utc>>,
    pub original_collected_at: Option<DateTime<Utc>>,
    pub blacklisted_date: Option<DateTime<Utc>>,
    pub final_check_add_timestamp: Option<DateTime<Utc>>,
    pub force_priority: Option<String>,
    pub fall_back_to_single_scraper: bool,
}

impl MediaItem {
    pub fn new_movie(title: impl Into<String>, version: Version) -> Self {
        Self::new(title, MediaType::Movie, None, None, version)
    }

    pub fn new_episode(
        title: impl Into<String>,
        season: i32,
        episode: i32,
        version: Version,
    ) -> Self {
        Self::new(title, MediaType::Episode, Some(season), Some(episode), version)
    }

    fn new(
        title: impl Into<String>,
        media_type: MediaType,
        season: Option<i32>,
        episode: Option<i32>,
        version: Version,
    ) -> Self {
        Self {
            id: ItemId::new(),
            imdb_id: None,
            tmdb_id: None,
            media_type,
            season,
            episode,
            version,
            title: title.into(),
            year: None,
            episode_title: None,
            release_date: None,
            physical_release_date: None,
            runtime_minutes: None,
            airtime: None,
            genres: Vec::new(),
            country: None,
            anime: false,
            early_release: false,
            no_early_release: false,
            content_source: "unknown".to_string(),
            content_source_detail: None,
            requested_season: None,
            disable_not_wanted_check: false,
            state: ItemState::Wanted,
            filled_by_file: None,
            filled_by_title: None,
            filled_by_magnet: None,
            filled_by_torrent_id: None,
            location_on_disk: None,
            original_path_for_symlink: None,
            original_scraped_torrent_title: None,
            upgrading_from: None,
            upgrading_from_version: None,
            upgrading_from_torrent_id: None,
            upgraded: false,
            current_score: None,
            wake_count: 0,
            sleep_cycles: 0,
            last_updated: Utc::now(),
            collected_at: None,
            original_collected_at: None,
            blacklisted_date: None,
            final_check_add_timestamp: None,
            force_priority: None,
            fall_back_to_single_scraper: false,
        }
    }

    pub fn identity(&self) -> ItemIdentity {
        ItemIdentity {
            imdb_id: self.imdb_id.clone(),
            tmdb_id: self.tmdb_id,
            media_type: self.media_type,
            season: self.season,
            episode: self.episode,
        }
    }

    /// True once the release date has arrived (or an early-release signal
    /// was seen). Items with no known date are treated as released.
    pub fn is_released(&self, today: NaiveDate) -> bool {
        if self.early_release && !self.no_early_release {
            return true;
        }
        match self.release_date {
            Some(date) => date <= today,
            None => true,
        }
    }

    /// Clear every fulfillment field, as an admin reset does before
    /// returning the item to `Wanted`.
    pub fn clear_fulfillment(&mut self) {
        self.filled_by_file = None;
        self.filled_by_title = None;
        self.filled_by_magnet = None;
        self.filled_by_torrent_id = None;
        self.location_on_disk = None;
        self.original_path_for_symlink = None;
        self.original_scraped_torrent_title = None;
        self.upgrading_from = None;
        self.upgrading_from_version = None;
        self.upgrading_from_torrent_id = None;
        self.current_score = None;
        self.collected_at = None;
    }
}

/// Append-only audit row recording every hash handed to the debrid
/// provider for an item, and how it went.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentAttempt {
    pub id: AttemptId,
    pub item_id: ItemId,
    pub torrent_hash: String,
    pub title: String,
    pub rationale: String,
    pub outcome: AttemptOutcome,
    pub added_at: DateTime<Utc>,
}

impl TorrentAttempt {
    pub fn new(
        item_id: ItemId,
        torrent_hash: impl Into<String>,
        title: impl Into<String>,
        rationale: impl Into<String>,
        outcome: AttemptOutcome,
    ) -> Self {
        Self {
            id: AttemptId::new(),
            item_id,
            torrent_hash: torrent_hash.into().to_lowercase(),
            title: title.into(),
            rationale: rationale.into(),
            outcome,
            added_at: Utc::now(),
        }
    }
}

/// Per-show completeness record used by upgrade sweeps and periodic
/// reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvShow {
    pub id: ShowId,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<i64>,
    pub title: String,
    pub year: Option<i32>,
    pub anime: bool,
    pub episodes_per_season: Vec<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TvShow {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ShowId::new(),
            imdb_id: None,
            tmdb_id: None,
            title: title.into(),
            year: None,
            anime: false,
            episodes_per_season: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Absolute episode number for an SxxEyy pair, counting from season 1.
    /// Returns `None` when the season is unknown to the episode map.
    pub fn absolute_episode(&self, season: i32, episode: i32) -> Option<u32> {
        if season < 1 || episode < 1 {
            return None;
        }
        let season_idx = (season - 1) as usize;
        if season_idx >= self.episodes_per_season.len() {
            return None;
        }
        let prior: u32 = self.episodes_per_season[..season_idx].iter().sum();
        Some(prior + episode as u32)
    }
}

/// Version presence per show, denormalized for the upgrade controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvShowVersionStatus {
    pub show_id: ShowId,
    pub version: Version,
    pub total_episodes: u32,
    pub collected_episodes: u32,
    pub updated_at: DateTime<Utc>,
}

impl TvShowVersionStatus {
    pub fn is_complete(&self) -> bool {
        self.total_episodes > 0 && self.collected_episodes >= self.total_episodes
    }
}

/// Denormalized counters surfaced by the statistics endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticsSummary {
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

/// A queued transition notification awaiting delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub item_id: ItemId,
    pub from_state: ItemState,
    pub to_state: ItemState,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(
        item_id: ItemId,
        from_state: ItemState,
        to_state: ItemState,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            item_id,
            from_state,
            to_state,
            title: title.into(),
            created_at: Utc::now(),
            sent_at: None,
        }
    }
}

// ============================================================================
// Version Profile
// ============================================================================

/// User-defined quality/filter profile. Every recognized option is an
/// explicit field; unknown keys are a config error, never a silent ignore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionProfile {
    pub name: String,
    pub max_resolution: Resolution,
    #[serde(default)]
    pub resolution_wanted: ResolutionWanted,
    #[serde(default)]
    pub enable_hdr: bool,
    #[serde(default)]
    pub hdr_weight: i32,
    #[serde(default = "default_resolution_weight")]
    pub resolution_weight: i32,
    #[serde(default)]
    pub filter_in: Vec<String>,
    #[serde(default)]
    pub filter_out: Vec<String>,
    #[serde(default)]
    pub preferred_filter_in: Vec<(String, i32)>,
    #[serde(default)]
    pub preferred_filter_out: Vec<(String, i32)>,
    #[serde(default)]
    pub min_size_gb: f64,
    #[serde(default = "default_max_size_gb")]
    pub max_size_gb: f64,
    #[serde(default)]
    pub min_bitrate_mbps: f64,
    #[serde(default = "default_max_bitrate_mbps")]
    pub max_bitrate_mbps: f64,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub require_physical_release: bool,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_similarity_threshold_anime")]
    pub similarity_threshold_anime: f64,
    #[serde(default = "default_year_match_weight")]
    pub year_match_weight: i32,
    #[serde(default)]
    pub anime_filter_mode: AnimeFilterMode,
    #[serde(default)]
    pub fallback_version: Option<String>,
    #[serde(default = "default_wake_count")]
    pub wake_count: u32,
}

fn default_resolution_weight() -> i32 {
    15
}

fn default_max_size_gb() -> f64 {
    200.0
}

fn default_max_bitrate_mbps() -> f64 {
    1000.0
}

fn default_similarity_threshold() -> f64 {
    0.85
}

fn default_similarity_threshold_anime() -> f64 {
    0.70
}

fn default_year_match_weight() -> i32 {
    5
}

fn default_wake_count() -> u32 {
    6
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimeFilterMode {
    /// Anime releases pass the regular pipeline.
    Allow,
    /// Only anime releases are accepted.
    Only,
    /// Anime releases are rejected outright.
    Exclude,
}

impl Default for AnimeFilterMode {
    fn default() -> Self {
        Self::Allow
    }
}

impl VersionProfile {
    pub fn new(name: impl Into<String>, max_resolution: Resolution) -> Self {
        Self {
            name: name.into(),
            max_resolution,
            resolution_wanted: ResolutionWanted::default(),
            enable_hdr: false,
            hdr_weight: 0,
            resolution_weight: default_resolution_weight(),
            filter_in: Vec::new(),
            filter_out: Vec::new(),
            preferred_filter_in: Vec::new(),
            preferred_filter_out: Vec::new(),
            min_size_gb: 0.0,
            max_size_gb: default_max_size_gb(),
            min_bitrate_mbps: 0.0,
            max_bitrate_mbps: default_max_bitrate_mbps(),
            language_code: None,
            require_physical_release: false,
            similarity_threshold: default_similarity_threshold(),
            similarity_threshold_anime: default_similarity_threshold_anime(),
            year_match_weight: default_year_match_weight(),
            anime_filter_mode: AnimeFilterMode::default(),
            fallback_version: None,
            wake_count: default_wake_count(),
        }
    }
}

// ============================================================================
// Domain Validation
// ============================================================================

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Result<(), Vec<ValidationError>>;
}

impl Validate for MediaItem {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.title.trim().is_empty() {
            errors.push(ValidationError {
                field: "title",
                message: "title cannot be empty".into(),
            });
        }
        if self.imdb_id.is_none() && self.tmdb_id.is_none() {
            errors.push(ValidationError {
                field: "imdb_id",
                message: "item needs at least one external id".into(),
            });
        }
        match self.media_type {
            MediaType::Movie => {
                if self.season.is_some() || self.episode.is_some() {
                    errors.push(ValidationError {
                        field: "season",
                        message: "movies carry no season/episode".into(),
                    });
                }
            }
            MediaType::Episode => {
                if self.season.is_none() || self.episode.is_none() {
                    errors.push(ValidationError {
                        field: "season",
                        message: "episodes require season and episode".into(),
                    });
                }
            }
        }
        if self.version.stripped().is_empty() {
            errors.push(ValidationError {
                field: "version",
                message: "version profile name cannot be empty".into(),
            });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Validate for VersionProfile {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(ValidationError {
                field: "name",
                message: "name cannot be empty".into(),
            });
        }
        if self.max_resolution == Resolution::Unknown {
            errors.push(ValidationError {
                field: "max_resolution",
                message: "max_resolution must be a concrete resolution".into(),
            });
        }
        if self.min_size_gb < 0.0 || self.max_size_gb < self.min_size_gb {
            errors.push(ValidationError {
                field: "max_size_gb",
                message: "size bounds must satisfy 0 <= min <= max".into(),
            });
        }
        if self.min_bitrate_mbps < 0.0 || self.max_bitrate_mbps < self.min_bitrate_mbps {
            errors.push(ValidationError {
                field: "max_bitrate_mbps",
                message: "bitrate bounds must satisfy 0 <= min <= max".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            errors.push(ValidationError {
                field: "similarity_threshold",
                message: "similarity threshold must be within [0, 1]".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold_anime) {
            errors.push(ValidationError {
                field: "similarity_threshold_anime",
                message: "anime similarity threshold must be within [0, 1]".into(),
            });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// ============================================================================
// Domain Events (lightweight scaffolding)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<TPayload> {
    pub name: &'static str,
    pub occurred_at: DateTime<Utc>,
    pub payload: TPayload,
}

impl<TPayload> DomainEvent<TPayload> {
    pub fn new(name: &'static str, payload: TPayload) -> Self {
        Self {
            name,
            occurred_at: Utc::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemTransitionedPayload {
    pub item_id: ItemId,
    pub from_state: ItemState,
    pub to_state: ItemState,
    pub title: String,
}

pub type ItemTransitioned = DomainEvent<ItemTransitionedPayload>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemCollectedPayload {
    pub item_id: ItemId,
    pub title: String,
    pub version: Version,
    pub filled_by_file: Option<String>,
}

pub type ItemCollected = DomainEvent<ItemCollectedPayload>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemUpgradedPayload {
    pub item_id: ItemId,
    pub title: String,
    pub previous_file: Option<String>,
    pub new_file: Option<String>,
    pub score_before: Option<i32>,
    pub score_after: Option<i32>,
}

pub type ItemUpgraded = DomainEvent<ItemUpgradedPayload>;

// ============================================================================
// Tests
// ============================================================================
