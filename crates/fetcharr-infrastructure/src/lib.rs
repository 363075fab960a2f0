// SPDX-License-Identifier: GPL-3.0-or-later
pub mod repositories;
pub mod retry;
pub mod sqlite_adapters;

use anyhow::{anyhow, Result};
use fetcharr_config::AppConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub async fn init_database(config: &AppConfig) -> Result<SqlitePool> {
    info!(target: "infrastructure", "initializing database");

    // Normalize the database URL for SQLite on Windows
    let db_url = if config.database.url.starts_with("sqlite://")
        && !config.database.url.starts_with("sqlite://:memory:")
    {
        let db_path = config.database.url.trim_start_matches("sqlite://");
        let path = Path::new(db_path);

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
                info!(target: "infrastructure", path = %parent.display(), "created database directory");
            }
        }

        // Convert to absolute path for better Windows compatibility
        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        // Use the absolute path with forward slashes (SQLite handles this on all platforms)
        let path_str = absolute_path.to_string_lossy().replace('\\', "/");

        // Add create mode to ensure SQLite can create the file
        format!("sqlite://{}?mode=rwc", path_str)
    } else {
        config.database.url.clone()
    };

    info!(target: "infrastructure", db_url = %db_url, "connecting to database");

    // Attempt rows cascade with their item, which needs foreign key
    // enforcement switched on per connection.
    let options = SqliteConnectOptions::from_str(&db_url)?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.pool_max_size)
        .connect_with(options)
        .await?;

    // Refuse to start on a corrupted database file.
    let check: String = sqlx::query("PRAGMA integrity_check")
        .fetch_one(&pool)
        .await?
        .try_get(0)?;
    if check != "ok" {
        return Err(anyhow!("database integrity check failed: {check}"));
    }

    info!(target: "infrastructure", db_url = %config.database.url, "running migrations");
    sqlx::migrate!("../../migrations").run(&pool).await?;

    info!(target: "infrastructure", "database initialized successfully");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_conversion_windows_style() {
        let path = Path::new("data\\fetcharr.db");
        let normalized = path.to_string_lossy().replace('\\', "/");
        assert!(normalized.contains('/') || !normalized.contains('\\'));
    }

    #[test]
    fn relative_to_absolute_conversion() {
        let relative_path = Path::new("data/fetcharr.db");
        let result = std::env::current_dir().unwrap().join(relative_path);
        assert!(result.is_absolute());
    }

    #[tokio::test]
    async fn init_database_accepts_in_memory_url() {
        let mut config = AppConfig::default();
        config.database.url = "sqlite://:memory:".to_string();
        let pool = init_database(&config).await.expect("init database");

        let row = sqlx::query("SELECT COUNT(*) FROM media_items")
            .fetch_one(&pool)
            .await
            .expect("query migrated table");
        let count: i64 = row.try_get(0).expect("count column");
        assert_eq!(count, 0);
    }
}
