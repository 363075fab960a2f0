use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// One media file known to the library server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryFile {
    pub path: String,
    pub rating_key: String,
    pub guids: Vec<String>,
    pub added_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("library server responded with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

/// Library verifier: answers "is this file visible to the media server"
/// for Checking, and streams the full file set for reconciliation.
#[async_trait]
pub trait LibraryClient: Send + Sync {
    async fn find_by_filename(&self, name: &str) -> Result<Option<LibraryFile>, LibraryError>;

    async fn force_match(
        &self,
        rating_key: &str,
        tmdb_id: i64,
        title: &str,
        year: Option<i32>,
    ) -> Result<(), LibraryError>;

    async fn list_files(&self, section: &str) -> Result<Vec<LibraryFile>, LibraryError>;
}

/// Plex client using the JSON flavor of the library API.
pub struct PlexClient {
    client: Client,
    base_url: String,
    token: String,
}

impl PlexClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn get_container(&self, path_and_query: &str) -> Result<PlexContainer, LibraryError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path_and_query))
            .header("X-Plex-Token", &self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| LibraryError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LibraryError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(LibraryError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let wrapper: PlexResponse = serde_json::from_str(&body)
            .map_err(|e| LibraryError::Deserialization(e.to_string()))?;
        Ok(wrapper.media_container)
    }
}

#[derive(Debug, Deserialize)]
struct PlexResponse {
    #[serde(rename = "MediaContainer")]
    media_container: PlexContainer,
}

#[derive(Debug, Deserialize, Default)]
struct PlexContainer {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<PlexMetadata>,
}

#[derive(Debug, Deserialize)]
struct PlexMetadata {
    #[serde(rename = "ratingKey")]
    rating_key: String,
    #[serde(rename = "Guid", default)]
    guids: Vec<PlexGuid>,
    #[serde(rename = "Media", default)]
    media: Vec<PlexMedia>,
    #[serde(rename = "addedAt", default)]
    added_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PlexGuid {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PlexMedia {
    #[serde(rename = "Part", default)]
    parts: Vec<PlexPart>,
}

#[derive(Debug, Deserialize)]
struct PlexPart {
    #[serde(default)]
    file: String,
}

fn to_library_files(container: PlexContainer) -> Vec<LibraryFile> {
    let mut files = Vec::new();
    for metadata in container.metadata {
        let added_at = metadata
            .added_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
        let guids: Vec<String> = metadata.guids.into_iter().map(|g| g.id).collect();
        for media in metadata.media {
            for part in media.parts {
                if part.file.is_empty() {
                    continue;
                }
                files.push(LibraryFile {
                    path: part.file,
                    rating_key: metadata.rating_key.clone(),
                    guids: guids.clone(),
                    added_at,
                });
            }
        }
    }
    files
}

#[async_trait]
impl LibraryClient for PlexClient {
    async fn find_by_filename(&self, name: &str) -> Result<Option<LibraryFile>, LibraryError> {
        let container = self
            .get_container(&format!("/search?query={}", urlencode(name)))
            .await?;
        let wanted = name.to_lowercase();
        Ok(to_library_files(container)
            .into_iter()
            .find(|f| f.path.to_lowercase().ends_with(&wanted)))
    }

    async fn force_match(
        &self,
        rating_key: &str,
        tmdb_id: i64,
        title: &str,
        year: Option<i32>,
    ) -> Result<(), LibraryError> {
        let mut query = format!(
            "/library/metadata/{rating_key}/match?guid=tmdb://{tmdb_id}&name={}",
            urlencode(title)
        );
        if let Some(year) = year {
            query.push_str(&format!("&year={year}"));
        }

        let response = self
            .client
            .put(format!("{}{}", self.base_url, query))
            .header("X-Plex-Token", &self.token)
            .send()
            .await
            .map_err(|e| LibraryError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LibraryError::HttpStatus {
                status: response.status().as_u16(),
                body: String::new(),
            });
        }
        Ok(())
    }

    async fn list_files(&self, section: &str) -> Result<Vec<LibraryFile>, LibraryError> {
        let container = self
            .get_container(&format!("/library/sections/{section}/all"))
            .await?;
        Ok(to_library_files(container))
    }
}

fn urlencode(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                c.to_string()
            } else {
                c.to_string()
                    .bytes()
                    .map(|b| format!("%{b:02X}"))
                    .collect()
            }
        })
        .collect()
}

/// Walk the debrid mount and collect the file names present. Used by the
/// pending-paths task to resolve files the provider has materialized.
pub fn scan_mount(mount_path: impl AsRef<Path>) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut stack = vec![mount_path.as_ref().to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(target: "library", path = %dir.display(), %error, "mount scan skipped directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.insert(name.to_string());
            }
        }
    }
    names
}
