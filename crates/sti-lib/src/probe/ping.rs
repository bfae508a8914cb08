//! ICMP latency probe

use super::{Probe, ProbeError};
use crate::models::{fields, labels, FieldValue, ProbeKind, ProbeResult};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Configuration entry for one ping probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingEntry {
    /// Hostname or IP address
    pub target: String,
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    4
}

/// Summary statistics of one ping run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingStatistics {
    pub packets_sent: u32,
    pub packets_received: u32,
    /// Percentage of packets lost, 0 to 100
    pub packet_loss: f64,
    pub min_rtt: Duration,
    pub max_rtt: Duration,
    pub avg_rtt: Duration,
    pub stddev_rtt: Duration,
}

/// ICMP echo client
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Send `count` echo requests and wait for the run to finish
    async fn ping(&self, target: &str, count: u32) -> Result<PingStatistics>;
}

pub struct PingProbe {
    entry: PingEntry,
    pinger: Arc<dyn Pinger>,
}

impl PingProbe {
    pub fn new(entry: PingEntry, pinger: Arc<dyn Pinger>) -> Self {
        Self { entry, pinger }
    }
}

fn millis(duration: Duration) -> FieldValue {
    FieldValue::Integer(duration.as_millis() as i64)
}

#[async_trait]
impl Probe for PingProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Ping
    }

    fn describe(&self) -> serde_json::Value {
        json!({
            "target": self.entry.target,
            "count": self.entry.count,
        })
    }

    async fn run(&self) -> Result<ProbeResult, ProbeError> {
        let target = self.entry.target.trim();
        if target.is_empty() {
            return Err(ProbeError::InvalidInput("ping target is empty".to_string()));
        }
        // Would be read by `ping` as an option
        if target.starts_with('-') {
            return Err(ProbeError::InvalidInput(format!(
                "ping target {target:?} is not a host name or address"
            )));
        }
        if self.entry.count == 0 {
            return Err(ProbeError::InvalidInput(
                "ping count must be at least 1".to_string(),
            ));
        }

        let stats = self
            .pinger
            .ping(&self.entry.target, self.entry.count)
            .await
            .map_err(|e| ProbeError::step("ping test", e))?;

        ProbeResult::new(
            labels([("target", self.entry.target.clone())]),
            fields([
                ("packets_sent", FieldValue::from(stats.packets_sent)),
                ("packets_received", FieldValue::from(stats.packets_received)),
                ("packet_loss", FieldValue::from(stats.packet_loss)),
                ("rtt_min_ms", millis(stats.min_rtt)),
                ("rtt_max_ms", millis(stats.max_rtt)),
                ("rtt_avg_ms", millis(stats.avg_rtt)),
                ("rtt_mdev_ms", millis(stats.stddev_rtt)),
            ]),
        )
    }
}

/// Pings through the system `ping` binary
#[derive(Debug, Clone)]
pub struct SystemPinger {
    binary: PathBuf,
}

impl Default for SystemPinger {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ping"),
        }
    }
}

impl SystemPinger {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Pinger for SystemPinger {
    async fn ping(&self, target: &str, count: u32) -> Result<PingStatistics> {
        let output = Command::new(&self.binary)
            .arg("-c")
            .arg(count.to_string())
            .arg(target)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to start {}", self.binary.display()))?;

        // ping exits non-zero when no reply arrived, but still prints a
        // usable summary; only a missing summary is an error.
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ping_output(&stdout).with_context(|| {
            format!(
                "ping exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )
        })
    }
}

/// Parse the summary printed by iputils, BSD and busybox `ping`
pub fn parse_ping_output(output: &str) -> Result<PingStatistics> {
    let summary = output
        .lines()
        .find(|line| line.contains("packets transmitted"))
        .context("No packet summary in ping output")?;

    let mut stats = PingStatistics::default();
    for (index, part) in summary.split(',').map(str::trim).enumerate() {
        let number = part.split_whitespace().next().unwrap_or_default();
        match index {
            0 => stats.packets_sent = number.parse().context("Bad transmitted count")?,
            1 => stats.packets_received = number.parse().context("Bad received count")?,
            _ if part.contains("packet loss") => {
                stats.packet_loss = number
                    .trim_end_matches('%')
                    .parse()
                    .context("Bad packet loss")?;
            }
            _ => {}
        }
    }

    if let Some(rtt) = output.lines().find(|line| line.contains("min/avg/max")) {
        let (names, values) = rtt.split_once('=').context("Malformed rtt summary")?;
        let names = names.split_whitespace().last().unwrap_or_default();
        let values = values.trim().trim_end_matches("ms").trim();

        for (name, value) in names.split('/').zip(values.split('/')) {
            let value: f64 = value.parse().with_context(|| format!("Bad rtt value {value:?}"))?;
            let duration = Duration::from_micros((value.max(0.0) * 1000.0).round() as u64);
            match name {
                "min" => stats.min_rtt = duration,
                "avg" => stats.avg_rtt = duration,
                "max" => stats.max_rtt = duration,
                "mdev" | "stddev" => stats.stddev_rtt = duration,
                _ => {}
            }
        }
    } else if stats.packets_received > 0 {
        bail!("No rtt summary in ping output");
    }

    Ok(stats)
}
