//! Network quality probing library
//!
//! This crate provides the core functionality for:
//! - Speed test, iperf3 and ping probes
//! - Randomized, paced probe scheduling
//! - Reporting results to InfluxDB through the `influxdb2` client
//! - Health checks and observability

pub mod health;
pub mod models;
pub mod observability;
pub mod probe;
pub mod reporter;
pub mod runner;
pub mod sink;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use probe::{Probe, ProbeError};
pub use reporter::Reporter;
pub use runner::{Collaborators, ProbePlan, Scheduler, SchedulerBuilder};
pub use sink::{MetricsSink, Point, SinkError, SinkSettings};
