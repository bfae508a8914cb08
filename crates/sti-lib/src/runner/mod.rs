//! Probe orchestration
//!
//! Builds the probe set from configuration, fixes a random run order once,
//! and drives the endless run-report-pause cycle.

mod plan;
mod scheduler;
mod sequence;


pub use plan::{Collaborators, ProbePlan};
pub use scheduler::{Outcome, Scheduler, SchedulerBuilder, SchedulerConfig};
pub use sequence::{next_probe, ProbeInfo, ProbeSequence};
