//! iperf3 throughput probe
//!
//! The probe validates its parameters, hands a session description to an
//! [`IperfClient`] and only accepts reports that finished without an error
//! and with at least one established connection.

use super::{Probe, ProbeError};
use crate::models::{fields, labels, FieldValue, ProbeKind, ProbeResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Configuration entry for one iperf probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IperfEntry {
    #[serde(rename = "serverIP", alias = "serverip")]
    pub server_ip: String,
    #[serde(rename = "serverPort", alias = "serverport", default = "default_port")]
    pub server_port: u16,
    #[serde(default = "default_streams")]
    pub streams: u32,
    #[serde(default = "default_seconds")]
    pub seconds: u32,
    /// UDP unless set
    #[serde(default)]
    pub tcp: bool,
    /// Target bitrate passed to `-b`, e.g. `100M`
    #[serde(default)]
    pub bandwidth: Option<String>,
    /// Server sends, client receives
    #[serde(default)]
    pub reverse: bool,
}

fn default_port() -> u16 {
    5201
}

fn default_streams() -> u32 {
    1
}

fn default_seconds() -> u32 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

/// A validated iperf session description
#[derive(Debug, Clone, PartialEq)]
pub struct IperfSettings {
    pub server_ip: IpAddr,
    pub server_port: u16,
    pub streams: u32,
    pub seconds: u32,
    /// Reporting interval in seconds
    pub interval: u32,
    pub transport: Transport,
    pub bandwidth: Option<String>,
    pub reverse: bool,
}

/// Totals for one direction of a session
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IperfSum {
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub bits_per_second: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IperfConnection {
    #[serde(default)]
    pub socket: i64,
    #[serde(default)]
    pub remote_host: String,
    #[serde(default)]
    pub remote_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IperfStart {
    #[serde(default)]
    pub connected: Vec<IperfConnection>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IperfEnd {
    #[serde(default)]
    pub sum_sent: Option<IperfSum>,
    #[serde(default)]
    pub sum_received: Option<IperfSum>,
    /// UDP sessions report a single combined sum
    #[serde(default)]
    pub sum: Option<IperfSum>,
}

/// The JSON report produced by `iperf3 -J`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IperfReport {
    #[serde(default)]
    pub start: IperfStart,
    #[serde(default)]
    pub end: IperfEnd,
    #[serde(default)]
    pub error: String,
}

impl IperfReport {
    pub fn sent(&self) -> IperfSum {
        self.end
            .sum_sent
            .clone()
            .or_else(|| self.end.sum.clone())
            .unwrap_or_default()
    }

    pub fn received(&self) -> IperfSum {
        self.end
            .sum_received
            .clone()
            .or_else(|| self.end.sum.clone())
            .unwrap_or_default()
    }
}

/// iperf session runner; resolves once the session has completed
#[async_trait]
pub trait IperfClient: Send + Sync {
    async fn run(&self, settings: &IperfSettings) -> Result<IperfReport>;
}

pub struct IperfProbe {
    entry: IperfEntry,
    client: Arc<dyn IperfClient>,
}

impl IperfProbe {
    pub fn new(entry: IperfEntry, client: Arc<dyn IperfClient>) -> Self {
        Self { entry, client }
    }

    fn settings(&self) -> Result<IperfSettings, ProbeError> {
        let server_ip: IpAddr = self.entry.server_ip.parse().map_err(|e| {
            ProbeError::InvalidInput(format!(
                "iperf server ip {:?} is invalid: {e}",
                self.entry.server_ip
            ))
        })?;

        Ok(IperfSettings {
            server_ip,
            server_port: self.entry.server_port,
            streams: self.entry.streams,
            seconds: self.entry.seconds,
            interval: 1,
            transport: if self.entry.tcp {
                Transport::Tcp
            } else {
                Transport::Udp
            },
            bandwidth: self.entry.bandwidth.clone(),
            reverse: self.entry.reverse,
        })
    }
}

#[async_trait]
impl Probe for IperfProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Iperf
    }

    fn describe(&self) -> serde_json::Value {
        json!({
            "server_ip": self.entry.server_ip,
            "server_port": self.entry.server_port,
            "streams": self.entry.streams,
            "seconds": self.entry.seconds,
            "tcp": self.entry.tcp,
            "bandwidth": self.entry.bandwidth,
            "reverse": self.entry.reverse,
        })
    }

    async fn run(&self) -> Result<ProbeResult, ProbeError> {
        let settings = self.settings()?;

        let report = self
            .client
            .run(&settings)
            .await
            .map_err(|e| ProbeError::step("iperf session", e))?;

        if !report.error.is_empty() {
            return Err(ProbeError::Failed(format!(
                "iperf test failed: {}",
                report.error
            )));
        }
        if report.start.connected.is_empty() {
            return Err(ProbeError::Failed(
                "iperf test failed: no connection established".to_string(),
            ));
        }

        let sent = report.sent();
        let received = report.received();

        ProbeResult::new(
            labels([
                ("server_ip", self.entry.server_ip.clone()),
                ("server_port", self.entry.server_port.to_string()),
                ("streams", self.entry.streams.to_string()),
                ("seconds", self.entry.seconds.to_string()),
                ("tcp", self.entry.tcp.to_string()),
                ("reverse", self.entry.reverse.to_string()),
            ]),
            fields([
                (
                    "received_megabits_per_second",
                    FieldValue::from(received.bits_per_second / 1_000_000.0),
                ),
                (
                    "sent_megabits_per_second",
                    FieldValue::from(sent.bits_per_second / 1_000_000.0),
                ),
                ("received_bytes", FieldValue::from(received.bytes)),
                ("sent_bytes", FieldValue::from(sent.bytes)),
            ]),
        )
    }
}

/// Runs sessions through the `iperf3` binary in JSON mode
#[derive(Debug, Clone)]
pub struct Iperf3Command {
    binary: PathBuf,
}

impl Default for Iperf3Command {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("iperf3"),
        }
    }
}

impl Iperf3Command {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub(crate) fn args(settings: &IperfSettings) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            settings.server_ip.to_string(),
            "-p".to_string(),
            settings.server_port.to_string(),
            "-P".to_string(),
            settings.streams.to_string(),
            "-t".to_string(),
            settings.seconds.to_string(),
            "-i".to_string(),
            settings.interval.to_string(),
            "-J".to_string(),
            "--get-server-output".to_string(),
        ];
        if settings.transport == Transport::Udp {
            args.push("-u".to_string());
        }
        if let Some(bandwidth) = settings.bandwidth.as_deref().filter(|b| !b.is_empty()) {
            args.push("-b".to_string());
            args.push(bandwidth.to_string());
        }
        if settings.reverse {
            args.push("-R".to_string());
        }
        args
    }
}

#[async_trait]
impl IperfClient for Iperf3Command {
    async fn run(&self, settings: &IperfSettings) -> Result<IperfReport> {
        let args = Self::args(settings);
        debug!(binary = %self.binary.display(), args = ?args, "Starting iperf3 session");

        let output = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to start {}", self.binary.display()))?;

        // iperf3 -J writes a JSON report, including its "error" key, even when
        // it exits non-zero.
        match serde_json::from_slice::<IperfReport>(&output.stdout) {
            Ok(report) => Ok(report),
            Err(e) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(anyhow::anyhow!(
                    "iperf3 exited with {}: {}",
                    output.status,
                    stderr.trim()
                ))
                .context(format!("Unreadable iperf3 report: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fake client returning a canned report
    struct FakeClient {
        report: IperfReport,
        starts: AtomicUsize,
        last_settings: Mutex<Option<IperfSettings>>,
    }

    impl FakeClient {
        fn new(report: IperfReport) -> Self {
            Self {
                report,
                starts: AtomicUsize::new(0),
                last_settings: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl IperfClient for FakeClient {
        async fn run(&self, settings: &IperfSettings) -> Result<IperfReport> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            *self.last_settings.lock().unwrap() = Some(settings.clone());
            Ok(self.report.clone())
        }
    }

    fn entry(server_ip: &str) -> IperfEntry {
        IperfEntry {
            server_ip: server_ip.to_string(),
            server_port: 5201,
            streams: 4,
            seconds: 10,
            tcp: true,
            bandwidth: None,
            reverse: false,
        }
    }

    fn connected_report() -> IperfReport {
        IperfReport {
            start: IperfStart {
                connected: vec![IperfConnection {
                    socket: 5,
                    remote_host: "192.0.2.10".into(),
                    remote_port: 5201,
                }],
            },
            end: IperfEnd {
                sum_sent: Some(IperfSum {
                    bytes: 1_250_000_000,
                    bits_per_second: 1_000_000_000.0,
                }),
                sum_received: Some(IperfSum {
                    bytes: 1_240_000_000,
                    bits_per_second: 992_000_000.0,
                }),
                sum: None,
            },
            error: String::new(),
        }
    }

    #[tokio::test]
    async fn test_iperf_success_shapes_result() {
        let client = Arc::new(FakeClient::new(connected_report()));
        let probe = IperfProbe::new(entry("192.0.2.10"), client.clone());

        let result = probe.run().await.unwrap();

        assert_eq!(result.labels()["server_ip"], "192.0.2.10");
        assert_eq!(result.labels()["server_port"], "5201");
        assert_eq!(result.labels()["streams"], "4");
        assert_eq!(result.labels()["seconds"], "10");
        assert_eq!(result.labels()["tcp"], "true");
        assert_eq!(
            result.fields()["received_megabits_per_second"],
            FieldValue::Float(992.0)
        );
        assert_eq!(
            result.fields()["sent_megabits_per_second"],
            FieldValue::Float(1000.0)
        );
        assert_eq!(
            result.fields()["received_bytes"],
            FieldValue::UInteger(1_240_000_000)
        );

        let settings = client.last_settings.lock().unwrap().clone().unwrap();
        assert_eq!(settings.transport, Transport::Tcp);
        assert_eq!(settings.interval, 1);
    }

    #[tokio::test]
    async fn test_iperf_report_error_is_failure() {
        let mut report = connected_report();
        report.error = "the server is busy running a test. try again later".into();
        let probe = IperfProbe::new(entry("192.0.2.10"), Arc::new(FakeClient::new(report)));

        let err = probe.run().await.unwrap_err();
        assert!(matches!(err, ProbeError::Failed(_)));
        assert!(err.to_string().contains("server is busy"));
    }

    #[tokio::test]
    async fn test_iperf_zero_connections_is_failure() {
        let mut report = connected_report();
        report.start.connected.clear();
        let probe = IperfProbe::new(entry("192.0.2.10"), Arc::new(FakeClient::new(report)));

        let err = probe.run().await.unwrap_err();
        assert!(matches!(err, ProbeError::Failed(_)));
    }

    #[tokio::test]
    async fn test_iperf_invalid_ip_never_starts_client() {
        let client = Arc::new(FakeClient::new(connected_report()));
        let probe = IperfProbe::new(entry("not-an-ip"), client.clone());

        let err = probe.run().await.unwrap_err();

        assert!(matches!(err, ProbeError::InvalidInput(_)));
        assert_eq!(client.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_iperf3_args() {
        let settings = IperfSettings {
            server_ip: "2001:db8::1".parse().unwrap(),
            server_port: 5202,
            streams: 2,
            seconds: 5,
            interval: 1,
            transport: Transport::Udp,
            bandwidth: Some("50M".into()),
            reverse: true,
        };

        let args = Iperf3Command::args(&settings);
        assert_eq!(
            args,
            [
                "-c", "2001:db8::1", "-p", "5202", "-P", "2", "-t", "5", "-i", "1", "-J",
                "--get-server-output", "-u", "-b", "50M", "-R"
            ]
        );
    }

    #[test]
    fn test_parse_udp_report() {
        let raw = r#"{
            "start": {"connected": [{"socket": 5, "local_host": "10.0.0.2", "local_port": 40000, "remote_host": "10.0.0.1", "remote_port": 5201}]},
            "end": {"sum": {"start": 0, "end": 10.0, "seconds": 10.0, "bytes": 1310720, "bits_per_second": 1048576.0, "jitter_ms": 0.01, "lost_packets": 0, "packets": 160}}
        }"#;

        let report: IperfReport = serde_json::from_str(raw).unwrap();
        assert!(report.error.is_empty());
        assert_eq!(report.start.connected.len(), 1);
        assert_eq!(report.received().bytes, 1310720);
        assert_eq!(report.sent().bits_per_second, 1048576.0);
    }

    #[test]
    fn test_parse_error_report() {
        let raw = r#"{"start": {"connected": []}, "end": {}, "error": "unable to connect to server: Connection refused"}"#;

        let report: IperfReport = serde_json::from_str(raw).unwrap();
        assert_eq!(report.error, "unable to connect to server: Connection refused");
        assert!(report.start.connected.is_empty());
    }

    #[test]
    fn test_entry_defaults() {
        let entry: IperfEntry = serde_json::from_str(r#"{"serverIP": "192.0.2.1"}"#).unwrap();
        assert_eq!(entry.server_port, 5201);
        assert_eq!(entry.streams, 1);
        assert_eq!(entry.seconds, 10);
        // An omitted transport flag selects UDP
        assert!(!entry.tcp);
        assert!(!entry.reverse);
    }

    #[tokio::test]
    async fn test_omitted_transport_runs_udp() {
        let entry: IperfEntry = serde_json::from_str(r#"{"serverIP": "192.0.2.10"}"#).unwrap();
        let client = Arc::new(FakeClient::new(connected_report()));
        let probe = IperfProbe::new(entry, client.clone());

        let result = probe.run().await.unwrap();

        let settings = client.last_settings.lock().unwrap().clone().unwrap();
        assert_eq!(settings.transport, Transport::Udp);
        assert!(Iperf3Command::args(&settings).contains(&"-u".to_string()));
        assert_eq!(result.labels()["tcp"], "false");
    }
}
