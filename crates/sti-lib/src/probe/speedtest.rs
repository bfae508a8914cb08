//! Internet speed test probe
//!
//! Resolves a speedtest.net server, then measures latency, download and
//! upload throughput against it, in that order.

use super::{Probe, ProbeError};
use crate::models::{fields, labels, FieldValue, ProbeKind, ProbeResult};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Configuration entry for one speed test probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedtestEntry {
    /// Server to test against; empty selects the nearest server
    #[serde(rename = "serverID", alias = "serverid", default)]
    pub server_id: String,
}

/// A resolved speed test server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeedtestServer {
    pub id: String,
    pub name: String,
    pub sponsor: String,
    pub country: String,
    /// Upload endpoint, e.g. `http://host:8080/speedtest/upload.php`
    pub url: String,
}

/// What the speed test service knows about this client
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientInfo {
    pub ip: String,
    pub isp: String,
}

/// Latency measured against a server, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub latency_ms: f64,
    pub jitter_ms: f64,
}

/// Speed test protocol client
#[async_trait]
pub trait SpeedtestService: Send + Sync {
    /// Find a server by id; an empty id picks the best candidate
    async fn resolve_server(&self, server_id: &str) -> Result<SpeedtestServer>;

    async fn fetch_client_info(&self) -> Result<ClientInfo>;

    async fn ping_test(&self, server: &SpeedtestServer) -> Result<LatencyStats>;

    /// Download throughput in Mbit/s
    async fn download_test(&self, server: &SpeedtestServer) -> Result<f64>;

    /// Upload throughput in Mbit/s
    async fn upload_test(&self, server: &SpeedtestServer) -> Result<f64>;
}

pub struct SpeedtestProbe {
    entry: SpeedtestEntry,
    service: Arc<dyn SpeedtestService>,
}

impl SpeedtestProbe {
    pub fn new(entry: SpeedtestEntry, service: Arc<dyn SpeedtestService>) -> Self {
        Self { entry, service }
    }
}

#[async_trait]
impl Probe for SpeedtestProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Speedtest
    }

    fn describe(&self) -> serde_json::Value {
        json!({ "server_id": self.entry.server_id })
    }

    async fn run(&self) -> Result<ProbeResult, ProbeError> {
        let server = self
            .service
            .resolve_server(&self.entry.server_id)
            .await
            .map_err(|e| ProbeError::step("speedtest server lookup", e))?;
        let client = self
            .service
            .fetch_client_info()
            .await
            .map_err(|e| ProbeError::step("speedtest user info fetch", e))?;
        let latency = self
            .service
            .ping_test(&server)
            .await
            .map_err(|e| ProbeError::step("latency test", e))?;
        let download = self
            .service
            .download_test(&server)
            .await
            .map_err(|e| ProbeError::step("download test", e))?;
        let upload = self
            .service
            .upload_test(&server)
            .await
            .map_err(|e| ProbeError::step("upload test", e))?;

        ProbeResult::new(
            labels([
                ("server_id", server.id),
                ("server_country", server.country),
                ("user_ip", client.ip),
                ("user_isp", client.isp),
            ]),
            fields([
                ("latency_ms", FieldValue::from(latency.latency_ms)),
                ("jitter_ms", FieldValue::from(latency.jitter_ms)),
                ("download_speed", FieldValue::from(download)),
                ("upload_speed", FieldValue::from(upload)),
            ]),
        )
    }
}
