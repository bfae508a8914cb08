//! Agent configuration
//!
//! Sources, lowest precedence first: built-in defaults, the first
//! `config.yaml` found on the search path, `STI_*` environment variables,
//! and finally an explicit `--config` file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sti_lib::probe::{IperfEntry, PingEntry, SpeedtestEntry};
use sti_lib::{ProbePlan, SinkSettings};

const ENV_PREFIX: &str = "STI";
const CONFIG_FILE_NAMES: [&str; 2] = ["config.yaml", "config.yml"];

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub speedtest: Vec<SpeedtestEntry>,

    #[serde(default)]
    pub iperf: Vec<IperfEntry>,

    #[serde(default)]
    pub ping: Vec<PingEntry>,

    /// InfluxDB base URL
    #[serde(rename = "influxURL", alias = "influxurl", default = "default_influx_url")]
    pub influx_url: String,

    #[serde(rename = "influxToken", alias = "influxtoken", default)]
    pub influx_token: String,

    #[serde(rename = "influxOrg", alias = "influxorg", default)]
    pub influx_org: String,

    #[serde(rename = "influxBucket", alias = "influxbucket", default)]
    pub influx_bucket: String,

    /// Reported as the `host` tag when non-empty
    #[serde(rename = "influxHostname", alias = "influxhostname", default)]
    pub influx_hostname: String,

    /// Pause after every probe attempt
    #[serde(default = "default_interval", deserialize_with = "de_duration")]
    pub interval: Duration,

    #[serde(
        rename = "probeTimeout",
        alias = "probetimeout",
        default,
        deserialize_with = "de_opt_duration"
    )]
    pub probe_timeout: Option<Duration>,

    /// Port for the health/metrics server; disabled when unset
    #[serde(rename = "metricsPort", alias = "metricsport", default)]
    pub metrics_port: Option<u16>,

    #[serde(default)]
    pub verbose: bool,
}

fn default_influx_url() -> String {
    SinkSettings::default().url
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

impl AgentConfig {
    /// Load from the default search path and the process environment
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_from(explicit, &search_dirs(), None)
    }

    /// Load with explicit search directories and, optionally, a fixed
    /// environment in place of the process environment
    pub fn load_from(
        explicit: Option<&Path>,
        search_dirs: &[PathBuf],
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(found) = find_config_file(search_dirs) {
            builder = builder.add_source(config::File::from(found));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        if let Some(path) = explicit {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: AgentConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            bail!("interval must be greater than zero");
        }
        if self.influx_url.trim().is_empty() {
            bail!("influxURL must not be empty");
        }
        Ok(())
    }

    pub fn plan(&self) -> ProbePlan {
        ProbePlan {
            speedtest: self.speedtest.clone(),
            iperf: self.iperf.clone(),
            ping: self.ping.clone(),
        }
    }

    pub fn sink_settings(&self) -> SinkSettings {
        SinkSettings {
            url: self.influx_url.clone(),
            token: self.influx_token.clone(),
            org: self.influx_org.clone(),
            bucket: self.influx_bucket.clone(),
            hostname: Some(self.influx_hostname.trim())
                .filter(|h| !h.is_empty())
                .map(str::to_string),
        }
    }
}

/// `.`, `$HOME/.config/sti`, `/etc/sti`
fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(".")];
    if let Some(home) = dirs_next::home_dir() {
        dirs.push(home.join(".config").join("sti"));
    }
    dirs.push(PathBuf::from("/etc/sti"));
    dirs
}

fn find_config_file(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.is_file())
}

/// Parse a duration such as `90s`, `1m30s`, `500ms` or `2h`; a bare
/// number is taken as seconds
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(input).with_context(|| format!("invalid duration {input:?}"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration<E: serde::de::Error>(self) -> Result<Duration, E> {
        match self {
            RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Text(text) => parse_duration(&text).map_err(E::custom),
        }
    }
}

fn de_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    RawDuration::deserialize(deserializer)?.into_duration()
}

fn de_opt_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    match Option::<RawDuration>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawDuration::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(raw) => raw.into_duration().map(Some),
    }
}
