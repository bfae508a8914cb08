//! Time-series sinks
//!
//! A [`MetricsSink`] accepts one [`Point`] per write. [`InfluxSink`] writes
//! through the InfluxDB v2 API.

mod influx;

pub use influx::{InfluxSink, SinkSettings};

use crate::models::{Fields, Labels};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from a sink liveness check or write
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to reach sink: {0}")]
    Unreachable(#[source] influxdb2::RequestError),

    #[error("sink is not alive")]
    NotAlive,

    #[error("sink rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("point has no writable fields")]
    EmptyPoint,

    #[error("invalid point: {0}")]
    InvalidPoint(String),

    #[error("invalid sink configuration: {0}")]
    Config(String),
}

/// A single time-series point
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: Labels,
    pub fields: Fields,
    pub timestamp: DateTime<Utc>,
}

/// Destination for measurement points
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Liveness check; `Ok(false)` means reachable but not ready
    async fn ping(&self) -> Result<bool, SinkError>;

    /// Write a single point, blocking until the sink acknowledged it
    async fn write(&self, point: &Point) -> Result<(), SinkError>;
}
