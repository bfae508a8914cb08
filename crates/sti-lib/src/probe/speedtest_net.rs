//! speedtest.net HTTP client
//!
//! Implements [`SpeedtestService`] over the public speedtest.net endpoints:
//! the server list API, the client configuration document, and the
//! `latency.txt` / `random*.jpg` / `upload.php` resources exposed by every
//! test server.

use super::speedtest::{ClientInfo, LatencyStats, SpeedtestServer, SpeedtestService};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// Configuration for the speedtest.net client
#[derive(Debug, Clone)]
pub struct SpeedtestNetConfig {
    /// Base URL of the server list and configuration API
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Number of latency samples
    pub ping_count: usize,
    /// Image sizes fetched during the download test
    pub download_sizes: Vec<u32>,
    /// Payload size of each upload request in bytes
    pub upload_size: usize,
    /// Number of upload requests
    pub upload_rounds: usize,
    /// Stop issuing new transfers once a direction has run this long
    pub max_transfer_time: Duration,
}

impl Default for SpeedtestNetConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.speedtest.net".to_string(),
            request_timeout: Duration::from_secs(30),
            ping_count: 10,
            download_sizes: vec![350, 500, 750, 1000, 1500, 2000, 2500, 3000],
            upload_size: 1024 * 1024,
            upload_rounds: 8,
            max_transfer_time: Duration::from_secs(15),
        }
    }
}

/// Server entry as returned by `/api/js/servers`
#[derive(Debug, Deserialize)]
struct ServerRecord {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    sponsor: String,
    #[serde(default)]
    country: String,
    url: String,
}

impl From<ServerRecord> for SpeedtestServer {
    fn from(record: ServerRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            sponsor: record.sponsor,
            country: record.country,
            url: record.url,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// speedtest.net client backed by `reqwest`
pub struct SpeedtestNetClient {
    http: reqwest::Client,
    config: SpeedtestNetConfig,
}

impl SpeedtestNetClient {
    pub fn new(config: SpeedtestNetConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("sti/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build speedtest HTTP client")?;

        Ok(Self { http, config })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(SpeedtestNetConfig::default())
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn fetch_servers(&self, search: &str) -> Result<Vec<SpeedtestServer>> {
        let mut request = self
            .http
            .get(self.api_url("/api/js/servers"))
            .query(&[("engine", "js"), ("https_functional", "true"), ("limit", "10")]);
        if !search.is_empty() {
            request = request.query(&[("search", search)]);
        }

        let records: Vec<ServerRecord> = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Failed to decode server list")?;

        Ok(records.into_iter().map(SpeedtestServer::from).collect())
    }
}

/// Resolve a resource that lives next to the server's upload endpoint
fn server_resource(server: &SpeedtestServer, resource: &str) -> Result<Url> {
    let upload = Url::parse(&server.url)
        .with_context(|| format!("Invalid server URL: {}", server.url))?;
    upload
        .join(resource)
        .with_context(|| format!("Invalid server resource: {resource}"))
}

/// Extract the `<client ... />` attributes from the configuration document
pub(crate) fn parse_client_info(document: &str) -> Result<ClientInfo> {
    let start = document
        .find("<client ")
        .context("No client element in speedtest configuration")?;
    let element = &document[start..];
    let element = &element[..element.find('>').unwrap_or(element.len())];

    let ip = xml_attribute(element, "ip").context("Client element has no ip attribute")?;
    let isp = xml_attribute(element, "isp").unwrap_or_default();

    Ok(ClientInfo { ip, isp })
}

fn xml_attribute(element: &str, name: &str) -> Option<String> {
    let needle = format!(" {name}=\"");
    let start = element.find(&needle)? + needle.len();
    let len = element[start..].find('"')?;
    Some(unescape_xml(&element[start..start + len]))
}

/// Decode the predefined XML entities; anything else is kept as written
fn unescape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ]
        .into_iter()
        .find(|(entity, _)| rest.starts_with(entity));

        match decoded {
            Some((entity, c)) => {
                out.push(c);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Mean latency and mean absolute difference between consecutive samples
pub(crate) fn latency_stats(samples: &[Duration]) -> Option<LatencyStats> {
    if samples.is_empty() {
        return None;
    }

    let millis: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
    let latency_ms = millis.iter().sum::<f64>() / millis.len() as f64;
    let jitter_ms = if millis.len() < 2 {
        0.0
    } else {
        millis.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / (millis.len() - 1) as f64
    };

    Some(LatencyStats {
        latency_ms,
        jitter_ms,
    })
}

/// Throughput in Mbit/s
pub(crate) fn throughput_mbps(bytes: u64, elapsed: Duration) -> Result<f64> {
    if bytes == 0 {
        bail!("no data transferred");
    }
    let secs = elapsed.as_secs_f64().max(1e-6);
    Ok(bytes as f64 * 8.0 / secs / 1_000_000.0)
}

#[async_trait]
impl SpeedtestService for SpeedtestNetClient {
    async fn resolve_server(&self, server_id: &str) -> Result<SpeedtestServer> {
        let servers = self.fetch_servers(server_id).await?;

        let server = if server_id.is_empty() {
            // The API returns servers ordered by distance
            servers.into_iter().next()
        } else {
            servers.into_iter().find(|s| s.id == server_id)
        };

        let server = server.with_context(|| {
            if server_id.is_empty() {
                "No speedtest servers available".to_string()
            } else {
                format!("Speedtest server {server_id} not found")
            }
        })?;

        debug!(
            server_id = %server.id,
            server_name = %server.name,
            sponsor = %server.sponsor,
            "Resolved speedtest server"
        );
        Ok(server)
    }

    async fn fetch_client_info(&self) -> Result<ClientInfo> {
        let document = self
            .http
            .get(self.api_url("/speedtest-config.php"))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_client_info(&document)
    }

    async fn ping_test(&self, server: &SpeedtestServer) -> Result<LatencyStats> {
        let url = server_resource(server, "latency.txt")?;
        let mut samples = Vec::with_capacity(self.config.ping_count);

        for attempt in 0..self.config.ping_count {
            let start = Instant::now();
            self.http
                .get(url.clone())
                .query(&[("x", attempt)])
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?;
            samples.push(start.elapsed());
        }

        latency_stats(&samples).context("No latency samples collected")
    }

    async fn download_test(&self, server: &SpeedtestServer) -> Result<f64> {
        let start = Instant::now();
        let mut total = 0u64;

        for size in &self.config.download_sizes {
            if start.elapsed() >= self.config.max_transfer_time {
                break;
            }
            let url = server_resource(server, &format!("random{size}x{size}.jpg"))?;
            let body = self
                .http
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?;
            total += body.len() as u64;
        }

        throughput_mbps(total, start.elapsed())
    }

    async fn upload_test(&self, server: &SpeedtestServer) -> Result<f64> {
        let url = Url::parse(&server.url)
            .with_context(|| format!("Invalid server URL: {}", server.url))?;
        let payload = vec![b'0'; self.config.upload_size];
        let start = Instant::now();
        let mut total = 0u64;

        for _ in 0..self.config.upload_rounds {
            if start.elapsed() >= self.config.max_transfer_time {
                break;
            }
            self.http
                .post(url.clone())
                .header("content-type", "application/octet-stream")
                .body(payload.clone())
                .send()
                .await?
                .error_for_status()?;
            total += payload.len() as u64;
        }

        throughput_mbps(total, start.elapsed())
    }
}
