//! Observability for the probe agent
//!
//! Provides:
//! - Prometheus metrics (probe runs, probe duration, sink failures)
//! - Structured event logging with tracing

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, GaugeVec, HistogramVec, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

/// Histogram buckets for probe durations (in seconds); throughput tests
/// routinely take tens of seconds
const PROBE_DURATION_BUCKETS: &[f64] = &[
    0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    probe_duration_seconds: HistogramVec,
    probe_runs: IntCounterVec,
    probe_last_success: GaugeVec,
    report_failures: IntCounter,
    probes_configured: IntGauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            probe_duration_seconds: register_histogram_vec!(
                "sti_probe_duration_seconds",
                "Time spent running a probe",
                &["probe"],
                PROBE_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register probe_duration_seconds"),

            probe_runs: register_int_counter_vec!(
                "sti_probe_runs_total",
                "Probe runs by outcome (reported, probe_failed, report_failed)",
                &["probe", "outcome"]
            )
            .expect("Failed to register probe_runs_total"),

            probe_last_success: register_gauge_vec!(
                "sti_probe_last_success_timestamp_seconds",
                "Unix time of the last successfully reported run",
                &["probe"]
            )
            .expect("Failed to register probe_last_success"),

            report_failures: register_int_counter!(
                "sti_report_failures_total",
                "Results that could not be written to the sink"
            )
            .expect("Failed to register report_failures_total"),

            probes_configured: register_int_gauge!(
                "sti_probes_configured",
                "Number of probes in the run cycle"
            )
            .expect("Failed to register probes_configured"),
        }
    }
}

/// Lightweight handle to the global metrics instance
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    /// Snapshot of every registered metric family, for text exposition
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        prometheus::gather()
    }

    pub fn observe_probe_duration(&self, probe: &str, duration_secs: f64) {
        self.inner()
            .probe_duration_seconds
            .with_label_values(&[probe])
            .observe(duration_secs);
    }

    pub fn inc_probe_run(&self, probe: &str, outcome: &str) {
        self.inner()
            .probe_runs
            .with_label_values(&[probe, outcome])
            .inc();
    }

    pub fn probe_runs(&self, probe: &str, outcome: &str) -> u64 {
        self.inner()
            .probe_runs
            .with_label_values(&[probe, outcome])
            .get()
    }

    pub fn set_last_success(&self, probe: &str, unix_secs: f64) {
        self.inner()
            .probe_last_success
            .with_label_values(&[probe])
            .set(unix_secs);
    }

    /// Unix time of the last reported run of `probe`, if any
    pub fn last_success(&self, probe: &str) -> Option<i64> {
        let value = self
            .inner()
            .probe_last_success
            .with_label_values(&[probe])
            .get();
        (value > 0.0).then_some(value as i64)
    }

    pub fn inc_report_failures(&self) {
        self.inner().report_failures.inc();
    }

    pub fn set_probes_configured(&self, count: i64) {
        self.inner().probes_configured.set(count);
    }
}

/// Structured logger for agent events
///
/// Every record carries an `event` key and the agent's host so log
/// pipelines can filter without parsing messages.
#[derive(Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn log_startup(&self, version: &str, probes: usize) {
        info!(
            event = "agent_started",
            host = %self.host,
            agent_version = %version,
            probes = probes,
            "starting sti"
        );
    }

    pub fn log_no_probes(&self) {
        info!(
            event = "no_probes",
            host = %self.host,
            error = "no tests configured",
            "exiting"
        );
    }

    pub fn log_probe_started(&self, probe: &str, config: &serde_json::Value) {
        info!(
            event = "probe_started",
            host = %self.host,
            test = %probe,
            config = %config,
            "running test"
        );
    }

    pub fn log_probe_completed(&self, probe: &str, fields: &str, elapsed_ms: u128) {
        info!(
            event = "probe_completed",
            host = %self.host,
            test = %probe,
            fields = %fields,
            elapsed_ms = elapsed_ms,
            "test complete"
        );
    }

    pub fn log_probe_failed(&self, probe: &str, config: &serde_json::Value, err: &str) {
        error!(
            event = "probe_failed",
            host = %self.host,
            test = %probe,
            config = %config,
            error = %err,
            "failed to run test"
        );
    }

    pub fn log_report_written(&self, probe: &str) {
        info!(
            event = "report_written",
            host = %self.host,
            test = %probe,
            "data written to influx"
        );
    }

    pub fn log_report_failed(&self, probe: &str, err: &str) {
        error!(
            event = "report_failed",
            host = %self.host,
            test = %probe,
            error = %err,
            "failed to write data to influx"
        );
    }

    pub fn log_pause(&self, seconds: f64) {
        debug!(event = "pause", host = %self.host, seconds = seconds, "pausing");
    }

    pub fn log_shutdown(&self, reason: &str) {
        warn!(
            event = "agent_shutdown",
            host = %self.host,
            reason = %reason,
            "sti shutting down"
        );
    }
}
