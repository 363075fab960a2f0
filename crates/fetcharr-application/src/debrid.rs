use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use thiserror::Error;

/// Lifecycle of a torrent inside the debrid provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebridTorrentState {
    MagnetConversion,
    WaitingFilesSelection,
    Queued,
    Downloading,
    Downloaded,
    Error,
    Virus,
    Dead,
    Unknown,
}

impl DebridTorrentState {
    /// States the provider will never move out of on its own.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Error | Self::Virus | Self::Dead)
    }

    /// A downloaded torrent is served from the provider's cache.
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Downloaded)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebridTorrent {
    pub id: String,
    pub hash: String,
    pub filename: String,
    pub state: DebridTorrentState,
    pub progress_percent: u8,
    pub bytes: u64,
    pub links: Vec<String>,
}

/// Account traffic usage aggregated across the provider's hosts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebridTraffic {
    pub used_bytes: u64,
    pub limit_bytes: u64,
    pub percent_used: f64,
}

/// How many slots of the provider's concurrent download quota are in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveDownloads {
    pub count: u32,
    pub limit: u32,
}

impl ActiveDownloads {
    /// A limit of zero means the provider reported no quota.
    pub fn at_capacity(&self) -> bool {
        self.limit > 0 && self.count >= self.limit
    }
}

#[derive(Debug, Error)]
pub enum DebridError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("authentication failed")]
    Unauthorized,
    #[error("provider rejected: too many active downloads")]
    TooManyActiveDownloads,
    #[error("provider rejected the torrent as infringing")]
    InfringingTorrent,
    #[error("invalid magnet")]
    InvalidMagnet,
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),
    #[error("debrid provider responded with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

impl DebridError {
    /// Errors that pause the whole pipeline rather than fail one item.
    pub fn is_provider_wide(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized | Self::TooManyActiveDownloads | Self::Request(_)
        )
    }
}

#[async_trait]
pub trait DebridClient: Send + Sync {
    async fn test_connection(&self) -> Result<(), DebridError>;

    /// Submit a magnet and return the provider-side torrent id.
    async fn add_magnet(&self, magnet: &str) -> Result<String, DebridError>;

    async fn get_torrent(&self, id: &str) -> Result<DebridTorrent, DebridError>;

    async fn select_all_files(&self, id: &str) -> Result<(), DebridError>;

    async fn delete_torrent(&self, id: &str) -> Result<(), DebridError>;

    async fn list_torrents(&self) -> Result<Vec<DebridTorrent>, DebridError>;

    /// Account-wide traffic usage.
    async fn get_traffic(&self) -> Result<DebridTraffic, DebridError>;

    /// Concurrent download slots in use versus the account's limit.
    async fn get_active_downloads(&self) -> Result<ActiveDownloads, DebridError>;
}

/// Real-Debrid REST client. All requests carry the bearer token; provider
/// error codes are folded into [`DebridError`] variants so callers never see
/// raw status codes.
pub struct RealDebridClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RealDebridClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, DebridError> {
        Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|err| DebridError::InvalidBaseUrl(err.to_string()))
    }

    async fn read_body(response: reqwest::Response) -> Result<(u16, String), DebridError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DebridError::Request(e.to_string()))?;
        Ok((status, body))
    }

    fn map_failure(status: u16, body: String) -> DebridError {
        #[derive(Deserialize)]
        struct ProviderError {
            #[serde(default)]
            error_code: Option<i32>,
        }

        if let Ok(parsed) = serde_json::from_str::<ProviderError>(&body) {
            match parsed.error_code {
                Some(8) => return DebridError::Unauthorized,
                Some(21) => return DebridError::TooManyActiveDownloads,
                Some(30) => return DebridError::InvalidMagnet,
                Some(35) => return DebridError::InfringingTorrent,
                _ => {}
            }
        }
        if status == 401 || status == 403 {
            return DebridError::Unauthorized;
        }
        DebridError::HttpStatus { status, body }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, DebridError> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| DebridError::Request(e.to_string()))?;

        let (status, body) = Self::read_body(response).await?;
        if !(200..300).contains(&status) {
            return Err(Self::map_failure(status, body));
        }
        serde_json::from_str(&body).map_err(|e| DebridError::Deserialization(e.to_string()))
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<String, DebridError> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .form(form)
            .send()
            .await
            .map_err(|e| DebridError::Request(e.to_string()))?;

        let (status, body) = Self::read_body(response).await?;
        if !(200..300).contains(&status) {
            return Err(Self::map_failure(status, body));
        }
        Ok(body)
    }
}

#[derive(Debug, Deserialize)]
struct RealDebridAddResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RealDebridTorrent {
    id: String,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    progress: f32,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    links: Vec<String>,
}

impl From<RealDebridTorrent> for DebridTorrent {
    fn from(raw: RealDebridTorrent) -> Self {
        Self {
            state: map_torrent_status(&raw.status),
            progress_percent: raw.progress.round().clamp(0.0, 100.0) as u8,
            id: raw.id,
            hash: raw.hash.to_lowercase(),
            filename: raw.filename,
            bytes: raw.bytes,
            links: raw.links,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RealDebridHostTraffic {
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    limit: u64,
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RealDebridActiveCount {
    #[serde(default)]
    nb: u32,
    #[serde(default)]
    limit: u32,
}

fn map_torrent_status(status: &str) -> DebridTorrentState {
    match status {
        "magnet_conversion" => DebridTorrentState::MagnetConversion,
        "waiting_files_selection" => DebridTorrentState::WaitingFilesSelection,
        "queued" => DebridTorrentState::Queued,
        "downloading" | "compressing" | "uploading" => DebridTorrentState::Downloading,
        "downloaded" => DebridTorrentState::Downloaded,
        "error" | "magnet_error" => DebridTorrentState::Error,
        "virus" => DebridTorrentState::Virus,
        "dead" => DebridTorrentState::Dead,
        _ => DebridTorrentState::Unknown,
    }
}

#[async_trait]
impl DebridClient for RealDebridClient {
    async fn test_connection(&self) -> Result<(), DebridError> {
        #[derive(Deserialize)]
        struct User {
            #[allow(dead_code)]
            id: i64,
        }
        self.get_json::<User>("/user").await.map(|_| ())
    }

    async fn add_magnet(&self, magnet: &str) -> Result<String, DebridError> {
        let body = self
            .post_form("/torrents/addMagnet", &[("magnet", magnet)])
            .await?;
        let parsed: RealDebridAddResponse = serde_json::from_str(&body)
            .map_err(|e| DebridError::Deserialization(e.to_string()))?;
        Ok(parsed.id)
    }

    async fn get_torrent(&self, id: &str) -> Result<DebridTorrent, DebridError> {
        let raw: RealDebridTorrent = self.get_json(&format!("/torrents/info/{id}")).await?;
        Ok(raw.into())
    }

    async fn select_all_files(&self, id: &str) -> Result<(), DebridError> {
        self.post_form(&format!("/torrents/selectFiles/{id}"), &[("files", "all")])
            .await
            .map(|_| ())
    }

    async fn delete_torrent(&self, id: &str) -> Result<(), DebridError> {
        let url = self.endpoint(&format!("/torrents/delete/{id}"))?;
        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| DebridError::Request(e.to_string()))?;

        let (status, body) = Self::read_body(response).await?;
        // 404 on delete means the torrent is already gone; deletion is
        // idempotent from the caller's point of view.
        if !(200..300).contains(&status) && status != 404 {
            return Err(Self::map_failure(status, body));
        }
        Ok(())
    }

    async fn list_torrents(&self) -> Result<Vec<DebridTorrent>, DebridError> {
        let raw: Vec<RealDebridTorrent> = self.get_json("/torrents?limit=100").await?;
        Ok(raw.into_iter().map(Into::into).collect())
    }

    /// Hosts metered in links rather than bytes are excluded from the
    /// aggregate. Limits arrive in gigabytes.
    async fn get_traffic(&self) -> Result<DebridTraffic, DebridError> {
        const BYTES_PER_GB: u64 = 1_000_000_000;

        let per_host: HashMap<String, RealDebridHostTraffic> = self.get_json("/traffic").await?;
        let mut used_bytes = 0u64;
        let mut limit_bytes = 0u64;
        for traffic in per_host.into_values() {
            if traffic.kind == "links" {
                continue;
            }
            used_bytes += traffic.bytes;
            limit_bytes += traffic.limit.saturating_mul(BYTES_PER_GB);
        }
        let percent_used = if limit_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / limit_bytes as f64 * 100.0
        };
        Ok(DebridTraffic {
            used_bytes,
            limit_bytes,
            percent_used,
        })
    }

    async fn get_active_downloads(&self) -> Result<ActiveDownloads, DebridError> {
        let raw: RealDebridActiveCount = self.get_json("/torrents/activeCount").await?;
        Ok(ActiveDownloads {
            count: raw.nb,
            limit: raw.limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> RealDebridClient {
        RealDebridClient::new(server.uri(), "token".to_string())
    }

    #[tokio::test]
    async fn add_magnet_returns_torrent_id() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/torrents/addMagnet"))
            .and(header("authorization", "Bearer token"))
            .and(body_string_contains("magnet=magnet%3A%3Fxt%3Durn%3Abtih"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_string(r#"{"id":"RD123","uri":"/torrents/info/RD123"}"#),
            )
            .mount(&server)
            .await;

        let id = client(&server)
            .add_magnet("magnet:?xt=urn:btih:abcdef0123456789abcdef0123456789abcdef01")
            .await
            .expect("add should succeed");
        assert_eq!(id, "RD123");
    }

    #[tokio::test]
    async fn too_many_active_downloads_maps_to_variant() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/torrents/addMagnet"))
            .respond_with(ResponseTemplate::new(509).set_body_string(
                r#"{"error":"too_many_active_downloads","error_code":21}"#,
            ))
            .mount(&server)
            .await;

        let error = client(&server)
            .add_magnet("magnet:?xt=urn:btih:aaa")
            .await
            .unwrap_err();
        assert!(matches!(error, DebridError::TooManyActiveDownloads));
        assert!(error.is_provider_wide());
    }

    #[tokio::test]
    async fn get_torrent_maps_status_and_progress() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/torrents/info/RD123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{
                    "id": "RD123",
                    "hash": "ABCDEF0123456789ABCDEF0123456789ABCDEF01",
                    "filename": "Movie.2020.1080p.mkv",
                    "status": "downloaded",
                    "progress": 100,
                    "bytes": 4509715660,
                    "links": ["https://real-debrid.example/d/xyz"]
                }"#,
            ))
            .mount(&server)
            .await;

        let torrent = client(&server)
            .get_torrent("RD123")
            .await
            .expect("info should parse");

        assert_eq!(torrent.state, DebridTorrentState::Downloaded);
        assert!(torrent.state.is_cached());
        assert_eq!(torrent.progress_percent, 100);
        assert_eq!(torrent.hash, "abcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(torrent.links.len(), 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent_on_missing_torrent() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/torrents/delete/RD404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client(&server).delete_torrent("RD404").await.is_ok());
    }

    #[tokio::test]
    async fn unauthorized_maps_to_variant() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_string(r#"{"error":"bad_token","error_code":8}"#),
            )
            .mount(&server)
            .await;

        let error = client(&server).test_connection().await.unwrap_err();
        assert!(matches!(error, DebridError::Unauthorized));
    }

    #[tokio::test]
    async fn traffic_aggregates_byte_metered_hosts() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/traffic"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{
                    "real-debrid.example": {"bytes": 25000000000, "limit": 100, "type": "gigabytes"},
                    "mirror.example": {"bytes": 5000000000, "limit": 50, "type": "gigabytes"},
                    "links-only.example": {"links": 3, "limit": 10, "type": "links"}
                }"#,
            ))
            .mount(&server)
            .await;

        let traffic = client(&server)
            .get_traffic()
            .await
            .expect("traffic should parse");

        assert_eq!(traffic.used_bytes, 30_000_000_000);
        assert_eq!(traffic.limit_bytes, 150_000_000_000);
        assert!((traffic.percent_used - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn active_downloads_report_count_and_limit() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/torrents/activeCount"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"nb":25,"limit":25,"list":[]}"#),
            )
            .mount(&server)
            .await;

        let active = client(&server)
            .get_active_downloads()
            .await
            .expect("count should parse");

        assert_eq!(active.count, 25);
        assert_eq!(active.limit, 25);
        assert!(active.at_capacity());
        assert!(!ActiveDownloads { count: 3, limit: 25 }.at_capacity());
        assert!(!ActiveDownloads { count: 3, limit: 0 }.at_capacity());
    }

    #[test]
    fn terminal_states() {
        assert!(map_torrent_status("dead").is_terminal_failure());
        assert!(map_torrent_status("virus").is_terminal_failure());
        assert!(!map_torrent_status("downloading").is_terminal_failure());
    }
}
