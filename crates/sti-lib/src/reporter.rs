//! Result reporting
//!
//! Turns a probe result into one sink point: the series is the probe name,
//! tags are the result labels plus the agent's static tags, and the
//! timestamp is the time of the write.

use crate::models::{Labels, ProbeResult};
use crate::sink::{InfluxSink, MetricsSink, Point, SinkError, SinkSettings};
use chrono::Utc;
use std::sync::Arc;

/// Tag marking every point written by this agent
pub const AGENT_TAG: &str = "sti";

/// Tag carrying the configured host name
pub const HOST_TAG: &str = "host";

pub struct Reporter {
    sink: Arc<dyn MetricsSink>,
    default_tags: Labels,
}

impl Reporter {
    pub fn new(sink: Arc<dyn MetricsSink>, hostname: Option<&str>) -> Self {
        let mut default_tags = Labels::new();
        default_tags.insert(AGENT_TAG.to_string(), "true".to_string());
        if let Some(host) = hostname.filter(|h| !h.is_empty()) {
            default_tags.insert(HOST_TAG.to_string(), host.to_string());
        }

        Self { sink, default_tags }
    }

    /// Reporter writing to InfluxDB
    pub fn influx(settings: &SinkSettings) -> Result<Self, SinkError> {
        let sink = InfluxSink::new(settings)?;
        Ok(Self::new(Arc::new(sink), settings.hostname.as_deref()))
    }

    pub fn default_tags(&self) -> &Labels {
        &self.default_tags
    }

    /// Check the sink is alive, then write the result once
    ///
    /// No retry is attempted; the caller decides what a failure means.
    pub async fn write(&self, series: &str, result: &ProbeResult) -> Result<(), SinkError> {
        if !self.sink.ping().await? {
            return Err(SinkError::NotAlive);
        }

        let point = self.point(series, result);
        self.sink.write(&point).await
    }

    fn point(&self, series: &str, result: &ProbeResult) -> Point {
        // Result labels take precedence over default tags
        let mut tags = self.default_tags.clone();
        tags.extend(
            result
                .labels()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        Point {
            measurement: series.to_string(),
            tags,
            fields: result.fields().clone(),
            timestamp: Utc::now(),
        }
    }
}
