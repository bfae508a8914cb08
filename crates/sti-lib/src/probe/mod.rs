//! Network probes
//!
//! Every configured test is a [`Probe`]: a speed test against a
//! speedtest.net server, an iperf3 throughput test, or an ICMP ping test.
//! Probes hold their parameters immutably and delegate the actual network
//! work to a collaborator client, so each client can be replaced by a fake.

mod iperf;
mod ping;
mod speedtest;
mod speedtest_net;

pub use iperf::{
    Iperf3Command, IperfClient, IperfConnection, IperfEntry, IperfProbe, IperfReport,
    IperfSettings, IperfSum, Transport,
};
pub use ping::{parse_ping_output, PingEntry, PingProbe, PingStatistics, Pinger, SystemPinger};
pub use speedtest::{
    ClientInfo, LatencyStats, SpeedtestEntry, SpeedtestProbe, SpeedtestServer, SpeedtestService,
};
pub use speedtest_net::{SpeedtestNetClient, SpeedtestNetConfig};

use crate::models::{ProbeKind, ProbeResult};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by a probe run
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Parameters rejected before any network I/O
    #[error("invalid probe input: {0}")]
    InvalidInput(String),

    /// A collaborator call failed
    #[error("{step} failed: {cause:#}")]
    Step {
        step: &'static str,
        cause: anyhow::Error,
    },

    /// The test finished but its outcome is not usable
    #[error("{0}")]
    Failed(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe produced no fields")]
    EmptyResult,
}

impl ProbeError {
    pub(crate) fn step(step: &'static str, cause: anyhow::Error) -> Self {
        ProbeError::Step { step, cause }
    }
}

/// A runnable network test
#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> ProbeKind;

    /// Series name used when writing results
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Probe configuration, used as log context only
    fn describe(&self) -> serde_json::Value;

    /// Execute the test once; no retries
    async fn run(&self) -> Result<ProbeResult, ProbeError>;
}
