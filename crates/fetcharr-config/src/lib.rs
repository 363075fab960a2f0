// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use fetcharr_domain::{Resolution, Validate, VersionProfile};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    /// Bounded write retries on SQLite lock contention.
    pub write_retry_attempts: u32,
    /// Writes slower than this log a warning (milliseconds).
    pub slow_write_warn_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://fetcharr.db".to_string(),
            pool_max_size: 16,
            write_retry_attempts: 5,
            slow_write_warn_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5575,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub max_concurrent_tasks: usize,
    /// Per-task cadence overrides in seconds, keyed by stable task name.
    pub task_intervals: HashMap<String, u64>,
    /// How often the pause supervisor re-checks a system pause reason.
    pub pause_recheck_secs: u64,
    /// Bounded auto-resume attempts before staying paused for the operator.
    pub max_resume_attempts: u32,
    /// Grace window for in-flight work on shutdown (seconds).
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 8,
            task_intervals: HashMap::new(),
            pause_recheck_secs: 30,
            max_resume_attempts: 10,
            shutdown_grace_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperEndpoint {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub enabled: bool,
    /// Requests per minute allowed against this scraper.
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingConfig {
    pub scrapers: Vec<ScraperEndpoint>,
    /// Bounded fan-out across scrapers for a single item.
    pub scrape_concurrency: usize,
    /// Selector retries before an item is put to sleep.
    pub max_scrape_retries: u32,
    /// Seconds an item sleeps between wake cycles.
    pub sleep_cycle_secs: u64,
    /// Whether a blacklisted episode also vetoes season packs for its show.
    pub blacklist_blocks_season_packs: bool,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            scrapers: Vec::new(),
            scrape_concurrency: 4,
            max_scrape_retries: 3,
            sleep_cycle_secs: 60 * 60,
            blacklist_blocks_season_packs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebridConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub rate_limit_per_minute: u32,
    /// How long an uncached torrent may stay in Pending Uncached (seconds).
    pub uncached_window_secs: u64,
    /// Verification failures in Checking before reverting to Scraping.
    pub max_check_failures: u32,
}

impl Default for DebridConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.real-debrid.com/rest/1.0".to_string(),
            api_key: None,
            rate_limit_per_minute: 60,
            uncached_window_secs: 6 * 60 * 60,
            max_check_failures: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    pub base_url: String,
    pub token: Option<String>,
    /// Root of the debrid mount the verifier scans.
    pub mount_path: String,
    /// Delete rows whose file went missing, unless rescrape is on.
    pub rescrape_missing_files: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:32400".to_string(),
            token: None,
            mount_path: "/mnt/debrid".to_string(),
            rescrape_missing_files: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSourceConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Account the source is read for, where the provider needs one.
    #[serde(default)]
    pub username: Option<String>,
    pub enabled: bool,
    /// Poll cadence in seconds.
    pub check_period_secs: u64,
    /// Restrict this source to one media type ("movie" | "episode"), if set.
    pub media_type_filter: Option<String>,
    /// Skip items already present in watch history.
    pub skip_watched: bool,
    /// Ignore early-release signals for items from this source; they wait
    /// for the real release date and are never upgrade-swept.
    #[serde(default)]
    pub no_early_release: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContentSourcesConfig {
    pub sources: Vec<ContentSourceConfig>,
    /// Defer movies whose Trakt early-release signal has not fired yet.
    pub trakt_early_releases: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// Days after original collection during which upgrades are considered.
    pub window_days: i64,
    /// Minimum relative score improvement required to promote.
    pub percentage_threshold: f64,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            percentage_threshold: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub base_url: String,
    pub client_id: Option<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.trakt.tv".to_string(),
            client_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarConfig {
    /// Directory for not-wanted sets, toggles, and caches.
    pub data_dir: String,
    /// Purge the not-wanted sets on startup.
    pub purge_not_wanted_on_start: bool,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            purge_not_wanted_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub telemetry: TelemetryConfig,
    pub scheduler: SchedulerConfig,
    pub scraping: ScrapingConfig,
    pub debrid: DebridConfig,
    pub library: LibraryConfig,
    pub content_sources: ContentSourcesConfig,
    pub metadata: MetadataConfig,
    pub upgrades: UpgradeConfig,
    pub sidecar: SidecarConfig,
    pub versions: Vec<VersionProfile>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            http: HttpConfig::default(),
            telemetry: TelemetryConfig::default(),
            scheduler: SchedulerConfig::default(),
            scraping: ScrapingConfig::default(),
            debrid: DebridConfig::default(),
            library: LibraryConfig::default(),
            content_sources: ContentSourcesConfig::default(),
            metadata: MetadataConfig::default(),
            upgrades: UpgradeConfig::default(),
            sidecar: SidecarConfig::default(),
            versions: vec![VersionProfile::new("1080p", Resolution::R1080p)],
        }
    }
}

impl AppConfig {
    /// Look up a version profile by its stripped name.
    pub fn profile(&self, name: &str) -> Option<&VersionProfile> {
        self.versions.iter().find(|profile| profile.name == name)
    }

    /// Cadence for a scheduler task, falling back to the given default.
    pub fn task_interval_secs(&self, task: &str, default_secs: u64) -> u64 {
        self.scheduler
            .task_intervals
            .get(task)
            .copied()
            .unwrap_or(default_secs)
    }
}

/// Load configuration from defaults, optional TOML file, and environment
/// overrides (prefix: FETCHARR_). Version profiles are validated after
/// extraction; a bad profile is a startup error, not a runtime surprise.
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("FETCHARR_").split("__"));

    let config: AppConfig = figment.extract()?;

    for profile in &config.versions {
        if let Err(errors) = profile.validate() {
            let detail = errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            anyhow::bail!("invalid version profile '{}': {}", profile.name, detail);
        }
    }

    info!(target: "config", profiles = config.versions.len(), "configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_load_without_file() {
        let config = load(None).expect("defaults should load");
        assert_eq!(config.http.port, 5575);
        assert_eq!(config.upgrades.percentage_threshold, 0.10);
        assert_eq!(config.versions.len(), 1);
        assert_eq!(config.versions[0].name, "1080p");
    }

    #[test]
    fn toml_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        writeln!(
            file,
            r#"
[http]
host = "0.0.0.0"
port = 9090

[upgrades]
window_days = 14
percentage_threshold = 0.2

[scheduler.task_intervals]
task_wanted_refresh = 120
"#
        )
        .expect("write config");

        let config = load(Some(file.path())).expect("config should load");
        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.http.port, 9090);
        assert_eq!(config.upgrades.window_days, 14);
        assert_eq!(config.task_interval_secs("task_wanted_refresh", 600), 120);
        assert_eq!(config.task_interval_secs("task_upgrade_sweep", 600), 600);
    }

    #[test]
    fn invalid_profile_is_a_startup_error() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        writeln!(
            file,
            r#"
[[versions]]
name = "broken"
max_resolution = "1080p"
min_size_gb = 20.0
max_size_gb = 1.0
"#
        )
        .expect("write config");

        let result = load(Some(file.path()));
        assert!(result.is_err());
        let message = format!("{}", result.unwrap_err());
        assert!(message.contains("broken"));
    }

    #[test]
    fn profile_lookup_by_name() {
        let config = AppConfig::default();
        assert!(config.profile("1080p").is_some());
        assert!(config.profile("2160p").is_none());
    }
}
