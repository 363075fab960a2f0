use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonInfo {
    pub season: i32,
    pub episode_count: u32,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("metadata provider responded with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

/// Metadata battery: release dates, airtimes, season layouts, and title
/// aliases. Providers that cannot answer a question return `None` rather
/// than an error.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn get_release_date(
        &self,
        imdb_id: &str,
        season: Option<i32>,
        episode: Option<i32>,
    ) -> Result<Option<NaiveDate>, MetadataError>;

    async fn get_show_airtime(&self, imdb_id: &str) -> Result<Option<String>, MetadataError>;

    async fn get_show_seasons(&self, imdb_id: &str) -> Result<Vec<SeasonInfo>, MetadataError>;

    /// Alternative titles keyed by language code, for the selector's
    /// identity matching.
    async fn get_aliases(
        &self,
        imdb_id: &str,
    ) -> Result<HashMap<String, Vec<String>>, MetadataError>;
}

/// Trakt-backed metadata client.
pub struct TraktMetadataClient {
    client: Client,
    base_url: String,
    client_id: String,
}

impl TraktMetadataClient {
    pub fn new(base_url: String, client_id: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, MetadataError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("trakt-api-version", "2")
            .header("trakt-api-key", &self.client_id)
            .send()
            .await
            .map_err(|e| MetadataError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MetadataError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(MetadataError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| MetadataError::Deserialization(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TraktMovieSummary {
    #[serde(default)]
    released: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TraktEpisodeSummary {
    #[serde(default)]
    first_aired: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TraktShowSummary {
    #[serde(default)]
    airs: Option<TraktAirs>,
}

#[derive(Debug, Deserialize)]
struct TraktAirs {
    #[serde(default)]
    time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TraktSeason {
    number: i32,
    #[serde(default)]
    episode_count: u32,
}

#[derive(Debug, Deserialize)]
struct TraktAlias {
    title: String,
    #[serde(default)]
    country: Option<String>,
}

fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    // Trakt dates are either plain dates or RFC 3339 timestamps.
    let value = value?;
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| value.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

#[async_trait]
impl MetadataClient for TraktMetadataClient {
    async fn get_release_date(
        &self,
        imdb_id: &str,
        season: Option<i32>,
        episode: Option<i32>,
    ) -> Result<Option<NaiveDate>, MetadataError> {
        match (season, episode) {
            (Some(season), Some(episode)) => {
                let summary: TraktEpisodeSummary = self
                    .get_json(&format!(
                        "/shows/{imdb_id}/seasons/{season}/episodes/{episode}?extended=full"
                    ))
                    .await?;
                Ok(parse_date(summary.first_aired.as_deref()))
            }
            _ => {
                let summary: TraktMovieSummary = self
                    .get_json(&format!("/movies/{imdb_id}?extended=full"))
                    .await?;
                Ok(parse_date(summary.released.as_deref()))
            }
        }
    }

    async fn get_show_airtime(&self, imdb_id: &str) -> Result<Option<String>, MetadataError> {
        let summary: TraktShowSummary = self
            .get_json(&format!("/shows/{imdb_id}?extended=full"))
            .await?;
        Ok(summary.airs.and_then(|airs| airs.time))
    }

    async fn get_show_seasons(&self, imdb_id: &str) -> Result<Vec<SeasonInfo>, MetadataError> {
        let seasons: Vec<TraktSeason> = self
            .get_json(&format!("/shows/{imdb_id}/seasons"))
            .await?;
        Ok(seasons
            .into_iter()
            // Season 0 is specials; the pipeline never wants them.
            .filter(|s| s.number >= 1)
            .map(|s| SeasonInfo {
                season: s.number,
                episode_count: s.episode_count,
            })
            .collect())
    }

    async fn get_aliases(
        &self,
        imdb_id: &str,
    ) -> Result<HashMap<String, Vec<String>>, MetadataError> {
        let aliases: Vec<TraktAlias> = self
            .get_json(&format!("/shows/{imdb_id}/aliases"))
            .await?;
        let mut by_country: HashMap<String, Vec<String>> = HashMap::new();
        for alias in aliases {
            by_country
                .entry(alias.country.unwrap_or_else(|| "unknown".to_string()))
                .or_default()
                .push(alias.title);
        }
        Ok(by_country)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn movie_release_date_parses() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/movies/tt1375666"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"released":"2010-07-16"}"#),
            )
            .mount(&server)
            .await;

        let client = TraktMetadataClient::new(server.uri(), "cid".to_string());
        let date = client
            .get_release_date("tt1375666", None, None)
            .await
            .expect("request ok");
        assert_eq!(date, NaiveDate::from_ymd_opt(2010, 7, 16));
    }

    #[tokio::test]
    async fn episode_air_date_uses_timestamp_prefix() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/shows/tt11280740/seasons/1/episodes/3"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"first_aired":"2022-02-25T02:00:00.000Z"}"#),
            )
            .mount(&server)
            .await;

        let client = TraktMetadataClient::new(server.uri(), "cid".to_string());
        let date = client
            .get_release_date("tt11280740", Some(1), Some(3))
            .await
            .expect("request ok");
        assert_eq!(date, NaiveDate::from_ymd_opt(2022, 2, 25));
    }

    #[tokio::test]
    async fn seasons_skip_specials() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/shows/tt11280740/seasons"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[
                    {"number":0,"episode_count":2},
                    {"number":1,"episode_count":9},
                    {"number":2,"episode_count":10}
                ]"#,
            ))
            .mount(&server)
            .await;

        let client = TraktMetadataClient::new(server.uri(), "cid".to_string());
        let seasons = client
            .get_show_seasons("tt11280740")
            .await
            .expect("request ok");
        assert_eq!(
            seasons,
            vec![
                SeasonInfo {
                    season: 1,
                    episode_count: 9
                },
                SeasonInfo {
                    season: 2,
                    episode_count: 10
                },
            ]
        );
    }
}
