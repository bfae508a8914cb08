//! The fixed probe run order

use crate::probe::Probe;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A configured probe as reported to operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeInfo {
    /// Position in the run order
    pub position: usize,
    pub name: String,
    pub config: serde_json::Value,
}

/// Probes in the order they run, fixed for the life of the process
#[derive(Clone, Default)]
pub struct ProbeSequence {
    probes: Vec<Arc<dyn Probe>>,
}

impl ProbeSequence {
    /// Permute the probes once (Fisher-Yates)
    pub fn shuffled<R: Rng + ?Sized>(mut probes: Vec<Arc<dyn Probe>>, rng: &mut R) -> Self {
        probes.shuffle(rng);
        Self { probes }
    }

    /// Keep the given order
    pub fn in_order(probes: Vec<Arc<dyn Probe>>) -> Self {
        Self { probes }
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Probe>> {
        self.probes.iter()
    }

    /// Name and configuration of every probe, in run order
    pub fn describe(&self) -> Vec<ProbeInfo> {
        self.probes
            .iter()
            .enumerate()
            .map(|(position, probe)| ProbeInfo {
                position,
                name: probe.name().to_string(),
                config: probe.describe(),
            })
            .collect()
    }
}

impl fmt::Debug for ProbeSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.probes.iter().map(|p| p.name()))
            .finish()
    }
}

/// The probe at `index` and the index of the one after it
///
/// Indices wrap around, so repeatedly feeding back the returned index walks
/// the sequence cycle after cycle. Returns `None` for an empty sequence.
pub fn next_probe(sequence: &ProbeSequence, index: usize) -> Option<(&Arc<dyn Probe>, usize)> {
    if sequence.is_empty() {
        return None;
    }

    let current = index % sequence.len();
    Some((&sequence.probes[current], (current + 1) % sequence.len()))
}
