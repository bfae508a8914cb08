//! Probe run cycle
//!
//! Runs the probes of a fixed [`ProbeSequence`] one at a time, forever.
//! A failing probe or a failing write is logged and skipped; the same
//! pacing delay follows every attempt.

use super::sequence::{next_probe, ProbeSequence};
use crate::health::{components, HealthRegistry};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::probe::{Probe, ProbeError};
use crate::reporter::Reporter;
use anyhow::Result;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};

/// Configuration for the probe run cycle
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay after every probe attempt (default: 60 seconds)
    pub interval: Duration,
    /// Upper bound on a single probe run; `None` waits indefinitely
    pub probe_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            probe_timeout: None,
        }
    }
}

/// How one probe attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Reported,
    ProbeFailed,
    ReportFailed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Reported => "reported",
            Outcome::ProbeFailed => "probe_failed",
            Outcome::ReportFailed => "report_failed",
        }
    }
}

pub struct Scheduler {
    sequence: ProbeSequence,
    reporter: Reporter,
    config: SchedulerConfig,
    logger: StructuredLogger,
    metrics: Option<AgentMetrics>,
    health: Option<HealthRegistry>,
}

impl Scheduler {
    pub fn new(
        sequence: ProbeSequence,
        reporter: Reporter,
        config: SchedulerConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            sequence,
            reporter,
            config,
            logger,
            metrics: None,
            health: None,
        }
    }

    pub fn sequence(&self) -> &ProbeSequence {
        &self.sequence
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run the cycle until a value is sent on `shutdown`
    ///
    /// Returns immediately, without running anything, when no probes are
    /// configured.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        if self.sequence.is_empty() {
            self.logger.log_no_probes();
            return;
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_probes_configured(self.sequence.len() as i64);
        }
        if let Some(health) = &self.health {
            health.set_ready(true).await;
        }

        info!(
            probes = self.sequence.len(),
            order = ?self.sequence,
            interval_secs = self.config.interval.as_secs_f64(),
            "Starting probe cycle"
        );

        // Only an explicit signal stops the cycle; dropped senders do not
        tokio::select! {
            _ = self.cycle(None) => {}
            Ok(()) = shutdown.recv() => {
                info!("Shutting down probe cycle");
            }
        }

        if let Some(health) = &self.health {
            health.set_ready(false).await;
        }
    }

    /// Walk the sequence, pausing after each attempt; `limit` bounds the
    /// number of attempts
    pub(crate) async fn cycle(&self, limit: Option<usize>) -> usize {
        let mut index = 0;
        let mut attempts = 0;

        while limit.map_or(true, |limit| attempts < limit) {
            let Some((probe, next)) = next_probe(&self.sequence, index) else {
                break;
            };

            self.attempt(probe).await;
            attempts += 1;
            index = next;

            self.logger.log_pause(self.config.interval.as_secs_f64());
            sleep(self.config.interval).await;
        }

        attempts
    }

    /// Run one probe and report its result
    pub(crate) async fn attempt(&self, probe: &Arc<dyn Probe>) -> Outcome {
        let name = probe.name();
        let config = probe.describe();
        self.logger.log_probe_started(name, &config);

        let start = Instant::now();
        let run = match self.config.probe_timeout {
            Some(limit) => timeout(limit, probe.run())
                .await
                .unwrap_or(Err(ProbeError::Timeout(limit))),
            None => probe.run().await,
        };
        let elapsed = start.elapsed();

        if let Some(metrics) = &self.metrics {
            metrics.observe_probe_duration(name, elapsed.as_secs_f64());
        }

        let outcome = match run {
            Err(e) => {
                self.logger.log_probe_failed(name, &config, &e.to_string());
                if let Some(health) = &self.health {
                    health
                        .record_failure(components::SCHEDULER, format!("{name}: {e}"))
                        .await;
                }
                Outcome::ProbeFailed
            }
            Ok(result) => {
                self.logger
                    .log_probe_completed(name, &result.fields_json(), elapsed.as_millis());
                if let Some(health) = &self.health {
                    health.record_success(components::SCHEDULER).await;
                }

                debug!(test = %name, "Writing result to sink");
                match self.reporter.write(name, &result).await {
                    Ok(()) => {
                        self.logger.log_report_written(name);
                        if let Some(health) = &self.health {
                            health.record_success(components::SINK).await;
                        }
                        if let Some(metrics) = &self.metrics {
                            metrics
                                .set_last_success(name, chrono::Utc::now().timestamp() as f64);
                        }
                        Outcome::Reported
                    }
                    Err(e) => {
                        self.logger.log_report_failed(name, &e.to_string());
                        if let Some(health) = &self.health {
                            health.record_failure(components::SINK, e.to_string()).await;
                        }
                        if let Some(metrics) = &self.metrics {
                            metrics.inc_report_failures();
                        }
                        Outcome::ReportFailed
                    }
                }
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.inc_probe_run(name, outcome.as_str());
        }
        outcome
    }
}

/// Builder for the run cycle
pub struct SchedulerBuilder {
    probes: Vec<Arc<dyn Probe>>,
    reporter: Option<Reporter>,
    config: SchedulerConfig,
    logger: Option<StructuredLogger>,
    metrics: Option<AgentMetrics>,
    health: Option<HealthRegistry>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            probes: Vec::new(),
            reporter: None,
            config: SchedulerConfig::default(),
            logger: None,
            metrics: None,
            health: None,
        }
    }

    pub fn probes(mut self, probes: Vec<Arc<dyn Probe>>) -> Self {
        self.probes = probes;
        self
    }

    pub fn reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn probe_timeout(mut self, probe_timeout: Option<Duration>) -> Self {
        self.config.probe_timeout = probe_timeout;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn metrics(mut self, metrics: AgentMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Build with the probes shuffled by the thread-local RNG
    pub fn build(self) -> Result<Scheduler> {
        self.build_with_rng(&mut rand::thread_rng())
    }

    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Scheduler> {
        let reporter = self
            .reporter
            .ok_or_else(|| anyhow::anyhow!("Reporter is required"))?;
        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("unknown"));

        let mut scheduler = Scheduler::new(
            ProbeSequence::shuffled(self.probes, rng),
            reporter,
            self.config,
            logger,
        );
        scheduler.metrics = self.metrics;
        scheduler.health = self.health;
        Ok(scheduler)
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
