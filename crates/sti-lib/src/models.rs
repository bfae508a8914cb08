//! Core data models shared by probes, the runner and the reporter

use crate::probe::ProbeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The kind of network test a probe performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Speedtest,
    Iperf,
    Ping,
}

impl ProbeKind {
    /// Series name used for points written to the sink
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Speedtest => "speedtest",
            ProbeKind::Iperf => "iperf",
            ProbeKind::Ping => "ping",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed measurement value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    UInteger(u64),
    Boolean(bool),
    String(String),
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::UInteger(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

/// Low-cardinality descriptive tags, indexed by the sink
pub type Labels = BTreeMap<String, String>;

/// Measured values of a single run
pub type Fields = BTreeMap<String, FieldValue>;

/// Output of one successful probe run
///
/// Only constructed for runs that fully succeeded; a result always carries
/// at least one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    labels: Labels,
    fields: Fields,
}

impl ProbeResult {
    pub fn new(labels: Labels, fields: Fields) -> Result<Self, ProbeError> {
        if fields.is_empty() {
            return Err(ProbeError::EmptyResult);
        }
        Ok(Self { labels, fields })
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Fields rendered as a compact JSON object for log records
    pub fn fields_json(&self) -> String {
        serde_json::to_string(&self.fields).unwrap_or_default()
    }
}

/// Build a [`Labels`] map from string pairs
pub fn labels<K, V, I>(pairs: I) -> Labels
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Build a [`Fields`] map from key/value pairs
pub fn fields<K, I>(pairs: I) -> Fields
where
    K: Into<String>,
    I: IntoIterator<Item = (K, FieldValue)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_kind_names() {
        assert_eq!(ProbeKind::Speedtest.as_str(), "speedtest");
        assert_eq!(ProbeKind::Iperf.to_string(), "iperf");
        assert_eq!(ProbeKind::Ping.as_str(), "ping");
    }

    #[test]
    fn test_result_requires_fields() {
        let result = ProbeResult::new(labels([("target", "1.1.1.1")]), Fields::new());
        assert!(matches!(result, Err(ProbeError::EmptyResult)));
    }

    #[test]
    fn test_fields_json() {
        let result = ProbeResult::new(
            Labels::new(),
            fields([
                ("latency_ms", FieldValue::from(12.5)),
                ("packets_sent", FieldValue::from(4u32)),
            ]),
        )
        .unwrap();

        assert_eq!(result.fields_json(), r#"{"latency_ms":12.5,"packets_sent":4}"#);
    }
}
