use std::sync::Arc;

use async_trait::async_trait;
use fetcharr_config::ScraperEndpoint;
use fetcharr_domain::MediaType;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::rate_limit::RateLimiter;

/// One release offered by a scraper, normalized across indexers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedRelease {
    pub title: String,
    pub size_bytes: u64,
    pub magnet: Option<String>,
    pub url: Option<String>,
    pub seeders: Option<u32>,
    pub indexer_id: String,
}

impl ScrapedRelease {
    /// Lowercased BitTorrent infohash, from the magnet when present.
    pub fn infohash(&self) -> Option<String> {
        self.magnet.as_deref().and_then(infohash_from_magnet)
    }
}

/// Query handed to every scraper in the fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeQuery {
    pub imdb_id: Option<String>,
    pub title: String,
    pub year: Option<i32>,
    pub media_type: MediaType,
    pub season: Option<i32>,
    pub episode: Option<i32>,
}

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("scraper responded with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("deserialization failed: {0}")]
    Deserialization(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

#[async_trait]
pub trait ScraperClient: Send + Sync {
    fn name(&self) -> &str;

    fn enabled(&self) -> bool;

    async fn scrape(&self, query: &ScrapeQuery) -> Result<Vec<ScrapedRelease>, ScraperError>;

    async fn test_connection(&self) -> Result<(), ScraperError>;
}

lazy_static! {
    static ref BTIH_RE: Regex =
        Regex::new(r"(?i)btih:(?P<hash>[0-9a-f]{40})").expect("valid btih regex");
    static ref BARE_HASH_RE: Regex =
        Regex::new(r"(?i)^[0-9a-f]{40}$").expect("valid hash regex");
}

/// Extract the lowercase infohash from a magnet URI, or accept a bare
/// 40-hex hash as-is.
pub fn infohash_from_magnet(value: &str) -> Option<String> {
    if BARE_HASH_RE.is_match(value.trim()) {
        return Some(value.trim().to_lowercase());
    }
    BTIH_RE
        .captures(value)
        .and_then(|c| c.name("hash").map(|m| m.as_str().to_lowercase()))
}

pub fn magnet_for_hash(hash: &str, name: &str) -> String {
    format!(
        "magnet:?xt=urn:btih:{}&dn={}",
        hash.to_lowercase(),
        name.replace(' ', "+")
    )
}

// ============================================================================
// Torrentio-shaped scraper
// ============================================================================

/// Stremio/Torrentio-style scraper: one GET per item returning a stream
/// list keyed by infohash. The normalized result is all the core consumes;
/// raw indexer response handling beyond this shape is out of scope.
pub struct TorrentioScraper {
    client: Client,
    endpoint: ScraperEndpoint,
    limiter: RateLimiter,
}

impl TorrentioScraper {
    pub fn new(endpoint: ScraperEndpoint) -> Self {
        Self {
            client: Client::new(),
            limiter: RateLimiter::per_minute(endpoint.rate_limit_per_minute),
            endpoint: ScraperEndpoint {
                base_url: endpoint.base_url.trim_end_matches('/').to_string(),
                ..endpoint
            },
        }
    }

    fn stream_url(&self, query: &ScrapeQuery) -> Result<String, ScraperError> {
        let imdb_id = query.imdb_id.as_deref().ok_or_else(|| {
            ScraperError::Unsupported("torrentio requires an imdb id".to_string())
        })?;
        Ok(match query.media_type {
            MediaType::Movie => {
                format!("{}/stream/movie/{}.json", self.endpoint.base_url, imdb_id)
            }
            MediaType::Episode => format!(
                "{}/stream/series/{}:{}:{}.json",
                self.endpoint.base_url,
                imdb_id,
                query.season.unwrap_or(1),
                query.episode.unwrap_or(1)
            ),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TorrentioResponse {
    #[serde(default)]
    streams: Vec<TorrentioStream>,
}

#[derive(Debug, Deserialize)]
struct TorrentioStream {
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "infoHash")]
    info_hash: Option<String>,
    #[serde(rename = "behaviorHints", default)]
    behavior_hints: Option<TorrentioHints>,
    #[serde(default)]
    seeders: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TorrentioHints {
    #[serde(rename = "videoSize", default)]
    video_size: Option<u64>,
}

#[async_trait]
impl ScraperClient for TorrentioScraper {
    fn name(&self) -> &str {
        &self.endpoint.name
    }

    fn enabled(&self) -> bool {
        self.endpoint.enabled
    }

    async fn scrape(&self, query: &ScrapeQuery) -> Result<Vec<ScrapedRelease>, ScraperError> {
        let url = self.stream_url(query)?;
        self.limiter.acquire(&self.endpoint.name).await;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ScraperError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScraperError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(ScraperError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TorrentioResponse = serde_json::from_str(&body)
            .map_err(|e| ScraperError::Deserialization(e.to_string()))?;

        Ok(parsed
            .streams
            .into_iter()
            .filter_map(|stream| {
                let hash = stream.info_hash?;
                // Torrentio titles carry the release name on the first line.
                let title = stream
                    .title
                    .as_deref()
                    .map(|t| t.lines().next().unwrap_or(t).trim().to_string())
                    .filter(|t| !t.is_empty())?;
                Some(ScrapedRelease {
                    magnet: Some(magnet_for_hash(&hash, &title)),
                    size_bytes: stream
                        .behavior_hints
                        .as_ref()
                        .and_then(|h| h.video_size)
                        .unwrap_or(0),
                    seeders: stream.seeders,
                    url: None,
                    indexer_id: self.endpoint.name.clone(),
                    title,
                })
            })
            .collect())
    }

    async fn test_connection(&self) -> Result<(), ScraperError> {
        let url = format!("{}/manifest.json", self.endpoint.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ScraperError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ScraperError::HttpStatus {
                status: response.status().as_u16(),
                body: String::new(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Fan-out
// ============================================================================

/// Outcome of one fan-out pass: merged releases plus the scrapers that
/// failed (their errors are logged, never fatal to the pass).
#[derive(Debug, Default)]
pub struct FanOutResult {
    pub releases: Vec<ScrapedRelease>,
    pub failed_scrapers: Vec<String>,
}

/// Run the query against every enabled scraper with bounded concurrency,
/// merging results and deduplicating by infohash (falling back to title).
pub async fn scrape_all(
    scrapers: &[Arc<dyn ScraperClient>],
    query: &ScrapeQuery,
    concurrency: usize,
) -> FanOutResult {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::new();

    for scraper in scrapers.iter().filter(|s| s.enabled()).cloned() {
        let semaphore = semaphore.clone();
        let query = query.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let name = scraper.name().to_string();
            (name, scraper.scrape(&query).await)
        }));
    }

    let mut result = FanOutResult::default();
    let mut seen = Vec::new();
    for handle in handles {
        let Ok((name, outcome)) = handle.await else {
            continue;
        };
        match outcome {
            Ok(releases) => {
                for release in releases {
                    let key = release
                        .infohash()
                        .unwrap_or_else(|| release.title.to_lowercase());
                    if seen.contains(&key) {
                        continue;
                    }
                    seen.push(key);
                    result.releases.push(release);
                }
            }
            Err(error) => {
                warn!(target: "scrapers", scraper = %name, %error, "scrape failed");
                result.failed_scrapers.push(name);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(name: &str, base_url: String) -> ScraperEndpoint {
        ScraperEndpoint {
            name: name.to_string(),
            base_url,
            api_key: None,
            enabled: true,
            rate_limit_per_minute: 60,
        }
    }

    fn movie_query() -> ScrapeQuery {
        ScrapeQuery {
            imdb_id: Some("tt0111161".to_string()),
            title: "The Shawshank Redemption".to_string(),
            year: Some(1994),
            media_type: MediaType::Movie,
            season: None,
            episode: None,
        }
    }

    #[test]
    fn infohash_extraction() {
        let magnet = "magnet:?xt=urn:btih:ABCDEF0123456789ABCDEF0123456789ABCDEF01&dn=x";
        assert_eq!(
            infohash_from_magnet(magnet).as_deref(),
            Some("abcdef0123456789abcdef0123456789abcdef01")
        );
        assert_eq!(
            infohash_from_magnet("abcdef0123456789abcdef0123456789abcdef01").as_deref(),
            Some("abcdef0123456789abcdef0123456789abcdef01")
        );
        assert_eq!(infohash_from_magnet("not a magnet"), None);
    }

    #[tokio::test]
    async fn torrentio_scrape_parses_streams() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/stream/movie/tt0111161.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{
                    "streams": [
                        {
                            "title": "The.Shawshank.Redemption.1994.1080p.BluRay.x264-GROUP\n4.2 GB",
                            "infoHash": "ABCDEF0123456789ABCDEF0123456789ABCDEF01",
                            "behaviorHints": { "videoSize": 4509715660 }
                        },
                        {
                            "title": "no hash, skipped"
                        }
                    ]
                }"#,
            ))
            .mount(&server)
            .await;

        let scraper = TorrentioScraper::new(endpoint("torrentio", server.uri()));
        let releases = scraper.scrape(&movie_query()).await.expect("scrape ok");

        assert_eq!(releases.len(), 1);
        assert_eq!(
            releases[0].title,
            "The.Shawshank.Redemption.1994.1080p.BluRay.x264-GROUP"
        );
        assert_eq!(releases[0].size_bytes, 4509715660);
        assert_eq!(
            releases[0].infohash().as_deref(),
            Some("abcdef0123456789abcdef0123456789abcdef01")
        );
    }

    #[tokio::test]
    async fn torrentio_maps_http_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/stream/movie/tt0111161.json"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let scraper = TorrentioScraper::new(endpoint("torrentio", server.uri()));
        let error = scraper.scrape(&movie_query()).await.unwrap_err();
        assert!(matches!(
            error,
            ScraperError::HttpStatus { status: 503, .. }
        ));
    }

    #[tokio::test]
    async fn fan_out_merges_and_dedupes() {
        struct Fixed {
            name: String,
            releases: Vec<ScrapedRelease>,
            fail: bool,
        }

        #[async_trait]
        impl ScraperClient for Fixed {
            fn name(&self) -> &str {
                &self.name
            }
            fn enabled(&self) -> bool {
                true
            }
            async fn scrape(
                &self,
                _query: &ScrapeQuery,
            ) -> Result<Vec<ScrapedRelease>, ScraperError> {
                if self.fail {
                    Err(ScraperError::Request("boom".to_string()))
                } else {
                    Ok(self.releases.clone())
                }
            }
            async fn test_connection(&self) -> Result<(), ScraperError> {
                Ok(())
            }
        }

        let shared = ScrapedRelease {
            title: "Movie.2020.1080p-A".to_string(),
            size_bytes: 1,
            magnet: Some(magnet_for_hash(
                "abcdef0123456789abcdef0123456789abcdef01",
                "x",
            )),
            url: None,
            seeders: None,
            indexer_id: "one".to_string(),
        };
        let unique = ScrapedRelease {
            title: "Movie.2020.720p-B".to_string(),
            size_bytes: 2,
            magnet: Some(magnet_for_hash(
                "1111111111111111111111111111111111111111",
                "y",
            )),
            url: None,
            seeders: None,
            indexer_id: "two".to_string(),
        };

        let scrapers: Vec<Arc<dyn ScraperClient>> = vec![
            Arc::new(Fixed {
                name: "one".to_string(),
                releases: vec![shared.clone()],
                fail: false,
            }),
            Arc::new(Fixed {
                name: "two".to_string(),
                releases: vec![shared.clone(), unique.clone()],
                fail: false,
            }),
            Arc::new(Fixed {
                name: "broken".to_string(),
                releases: vec![],
                fail: true,
            }),
        ];

        let result = scrape_all(&scrapers, &movie_query(), 2).await;
        assert_eq!(result.releases.len(), 2);
        assert_eq!(result.failed_scrapers, vec!["broken".to_string()]);
    }
}
