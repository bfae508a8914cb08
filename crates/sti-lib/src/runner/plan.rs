//! Probe construction from configuration entries

use crate::probe::{
    Iperf3Command, IperfClient, IperfEntry, IperfProbe, PingEntry, PingProbe, Pinger, Probe,
    SpeedtestEntry, SpeedtestNetClient, SpeedtestProbe, SpeedtestService, SystemPinger,
};
use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;

/// Configured probes, grouped by kind in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProbePlan {
    #[serde(default)]
    pub speedtest: Vec<SpeedtestEntry>,
    #[serde(default)]
    pub iperf: Vec<IperfEntry>,
    #[serde(default)]
    pub ping: Vec<PingEntry>,
}

/// Clients the probes delegate to
#[derive(Clone)]
pub struct Collaborators {
    pub speedtest: Arc<dyn SpeedtestService>,
    pub iperf: Arc<dyn IperfClient>,
    pub pinger: Arc<dyn Pinger>,
}

impl Collaborators {
    /// speedtest.net over HTTP, the `iperf3` binary and the system `ping`
    pub fn system() -> Result<Self> {
        Ok(Self {
            speedtest: Arc::new(SpeedtestNetClient::with_defaults()?),
            iperf: Arc::new(Iperf3Command::default()),
            pinger: Arc::new(SystemPinger::default()),
        })
    }
}

impl ProbePlan {
    pub fn len(&self) -> usize {
        self.speedtest.len() + self.iperf.len() + self.ping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One probe per entry: speed tests, then iperf, then ping
    pub fn build(&self, clients: &Collaborators) -> Vec<Arc<dyn Probe>> {
        let mut probes: Vec<Arc<dyn Probe>> = Vec::with_capacity(self.len());

        for entry in &self.speedtest {
            probes.push(Arc::new(SpeedtestProbe::new(
                entry.clone(),
                clients.speedtest.clone(),
            )));
        }
        for entry in &self.iperf {
            probes.push(Arc::new(IperfProbe::new(entry.clone(), clients.iperf.clone())));
        }
        for entry in &self.ping {
            probes.push(Arc::new(PingProbe::new(entry.clone(), clients.pinger.clone())));
        }

        probes
    }
}
