use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use fetcharr_domain::{ItemIdentity, MediaType};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

/// One wanted entry as reported by a content source, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantedItem {
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<i64>,
    pub title: String,
    pub year: Option<i32>,
    pub media_type: MediaType,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub release_date: Option<NaiveDate>,
    pub genres: Vec<String>,
    pub content_source_detail: Option<String>,
    pub requested_season: Option<i32>,
}

#[derive(Debug, Error)]
pub enum ContentSourceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("content source responded with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

#[async_trait]
pub trait ContentSourceClient: Send + Sync {
    fn name(&self) -> &str;

    fn enabled(&self) -> bool;

    /// When set, wanted entries of the other media type are dropped at
    /// normalization time.
    fn media_type_filter(&self) -> Option<MediaType> {
        None
    }

    /// Whether entries already in the account's watch history are skipped
    /// at upsert time.
    fn skip_watched(&self) -> bool {
        false
    }

    /// Whether items from this source ignore early-release signals.
    fn no_early_release(&self) -> bool {
        false
    }

    async fn list_wanted(&self) -> Result<Vec<WantedItem>, ContentSourceError>;

    /// Identities the account has already watched. Sources without watch
    /// history report an empty set.
    async fn watch_history(&self) -> Result<HashSet<ItemIdentity>, ContentSourceError> {
        Ok(HashSet::new())
    }
}

/// Trakt watchlist source. Reads the configured user's watchlist and maps
/// movie and show entries; shows surface as `requested_season: None`, the
/// normalizer expands them per season via the metadata battery.
pub struct TraktWatchlistSource {
    client: Client,
    base_url: String,
    username: String,
    client_id: String,
    enabled: bool,
    skip_watched: bool,
    no_early_release: bool,
}

impl TraktWatchlistSource {
    pub fn new(base_url: String, username: String, client_id: String, enabled: bool) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            client_id,
            enabled,
            skip_watched: false,
            no_early_release: false,
        }
    }

    /// Per-source ingestion policy.
    pub fn with_policy(mut self, skip_watched: bool, no_early_release: bool) -> Self {
        self.skip_watched = skip_watched;
        self.no_early_release = no_early_release;
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, ContentSourceError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("trakt-api-version", "2")
            .header("trakt-api-key", &self.client_id)
            .send()
            .await
            .map_err(|e| ContentSourceError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ContentSourceError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(ContentSourceError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| ContentSourceError::Deserialization(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TraktEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    movie: Option<TraktMedia>,
    #[serde(default)]
    show: Option<TraktMedia>,
}

#[derive(Debug, Deserialize)]
struct TraktMedia {
    title: String,
    #[serde(default)]
    year: Option<i32>,
    ids: TraktIds,
}

#[derive(Debug, Deserialize)]
struct TraktIds {
    #[serde(default)]
    imdb: Option<String>,
    #[serde(default)]
    tmdb: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TraktWatchedEntry {
    #[serde(default)]
    movie: Option<TraktMedia>,
    #[serde(default)]
    show: Option<TraktMedia>,
    #[serde(default)]
    seasons: Vec<TraktWatchedSeason>,
}

#[derive(Debug, Deserialize)]
struct TraktWatchedSeason {
    number: i32,
    #[serde(default)]
    episodes: Vec<TraktWatchedEpisode>,
}

#[derive(Debug, Deserialize)]
struct TraktWatchedEpisode {
    number: i32,
}

#[async_trait]
impl ContentSourceClient for TraktWatchlistSource {
    fn name(&self) -> &str {
        "trakt_watchlist"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn skip_watched(&self) -> bool {
        self.skip_watched
    }

    fn no_early_release(&self) -> bool {
        self.no_early_release
    }

    async fn list_wanted(&self) -> Result<Vec<WantedItem>, ContentSourceError> {
        let entries: Vec<TraktEntry> = self
            .get_json(&format!("/users/{}/watchlist", self.username))
            .await?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let (media, media_type) = match entry.kind.as_str() {
                    "movie" => (entry.movie?, MediaType::Movie),
                    "show" => (entry.show?, MediaType::Episode),
                    _ => return None,
                };
                Some(WantedItem {
                    imdb_id: media.ids.imdb,
                    tmdb_id: media.ids.tmdb,
                    title: media.title,
                    year: media.year,
                    media_type,
                    season: None,
                    episode: None,
                    release_date: None,
                    genres: Vec::new(),
                    content_source_detail: Some("watchlist".to_string()),
                    requested_season: None,
                })
            })
            .collect())
    }

    /// Watched movies match by movie identity; watched shows expand into
    /// one identity per watched episode so only seen episodes are skipped.
    async fn watch_history(&self) -> Result<HashSet<ItemIdentity>, ContentSourceError> {
        let mut watched = HashSet::new();

        let movies: Vec<TraktWatchedEntry> = self
            .get_json(&format!("/users/{}/watched/movies", self.username))
            .await?;
        for entry in movies {
            if let Some(movie) = entry.movie {
                watched.insert(ItemIdentity::movie(movie.ids.imdb, movie.ids.tmdb));
            }
        }

        let shows: Vec<TraktWatchedEntry> = self
            .get_json(&format!("/users/{}/watched/shows", self.username))
            .await?;
        for entry in shows {
            let Some(show) = entry.show else {
                continue;
            };
            for season in &entry.seasons {
                for episode in &season.episodes {
                    watched.insert(ItemIdentity {
                        imdb_id: show.ids.imdb.clone(),
                        tmdb_id: show.ids.tmdb,
                        media_type: MediaType::Episode,
                        season: Some(season.number),
                        episode: Some(episode.number),
                    });
                }
            }
        }

        Ok(watched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn watchlist_maps_movies_and_shows() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users/alice/watchlist"))
            .and(header("trakt-api-key", "cid"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[
                    {
                        "type": "movie",
                        "movie": {
                            "title": "Inception",
                            "year": 2010,
                            "ids": { "imdb": "tt1375666", "tmdb": 27205 }
                        }
                    },
                    {
                        "type": "show",
                        "show": {
                            "title": "Severance",
                            "year": 2022,
                            "ids": { "imdb": "tt11280740", "tmdb": 95396 }
                        }
                    },
                    { "type": "season" }
                ]"#,
            ))
            .mount(&server)
            .await;

        let source =
            TraktWatchlistSource::new(server.uri(), "alice".to_string(), "cid".to_string(), true);
        let wanted = source.list_wanted().await.expect("list should parse");

        assert_eq!(wanted.len(), 2);
        assert_eq!(wanted[0].media_type, MediaType::Movie);
        assert_eq!(wanted[0].imdb_id.as_deref(), Some("tt1375666"));
        assert_eq!(wanted[1].media_type, MediaType::Episode);
        assert_eq!(wanted[1].title, "Severance");
    }

    #[tokio::test]
    async fn watch_history_maps_movies_and_watched_episodes() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users/alice/watched/movies"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[
                    {
                        "plays": 2,
                        "movie": {
                            "title": "Inception",
                            "year": 2010,
                            "ids": { "imdb": "tt1375666", "tmdb": 27205 }
                        }
                    }
                ]"#,
            ))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/users/alice/watched/shows"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[
                    {
                        "show": {
                            "title": "Severance",
                            "year": 2022,
                            "ids": { "imdb": "tt11280740", "tmdb": 95396 }
                        },
                        "seasons": [
                            { "number": 1, "episodes": [{ "number": 1 }, { "number": 2 }] }
                        ]
                    }
                ]"#,
            ))
            .mount(&server)
            .await;

        let source =
            TraktWatchlistSource::new(server.uri(), "alice".to_string(), "cid".to_string(), true)
                .with_policy(true, false);
        assert!(source.skip_watched());

        let watched = source.watch_history().await.expect("history should parse");

        assert_eq!(watched.len(), 3);
        assert!(watched.contains(&ItemIdentity::movie(
            Some("tt1375666".to_string()),
            Some(27205),
        )));
        assert!(watched.contains(&ItemIdentity {
            imdb_id: Some("tt11280740".to_string()),
            tmdb_id: Some(95396),
            media_type: MediaType::Episode,
            season: Some(1),
            episode: Some(2),
        }));
        assert!(!watched.contains(&ItemIdentity {
            imdb_id: Some("tt11280740".to_string()),
            tmdb_id: Some(95396),
            media_type: MediaType::Episode,
            season: Some(1),
            episode: Some(3),
        }));
    }

    #[tokio::test]
    async fn http_failures_surface_as_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users/alice/watchlist"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let source =
            TraktWatchlistSource::new(server.uri(), "alice".to_string(), "cid".to_string(), true);
        let error = source.list_wanted().await.unwrap_err();
        assert!(matches!(
            error,
            ContentSourceError::HttpStatus { status: 502, .. }
        ));
    }
}
