//! Metric event and report types.
//!
//! Metric events are append-only records of tool calls, generations and
//! errors. They reference a session by id only; a metric whose session was
//! never persisted is still a valid standalone record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::HubError;

/// Kind of measured event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// A tool invocation
    ToolCall,
    /// A model generation
    Generation,
    /// A failure reported by the orchestration layer
    Error,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::ToolCall => write!(f, "tool_call"),
            MetricKind::Generation => write!(f, "generation"),
            MetricKind::Error => write!(f, "error"),
        }
    }
}

/// A single measured event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub session_id: String,
    pub kind: MetricKind,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    #[serde(default)]
    pub cost_estimate: f64,
    pub timestamp: DateTime<Utc>,

    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_version: Option<u32>,
}

fn default_success() -> bool {
    true
}

impl MetricEvent {
    /// Create a successful event of `kind` stamped with the current time.
    pub fn new(session_id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            duration_ms: 0,
            tokens_in: 0,
            tokens_out: 0,
            cost_estimate: 0.0,
            timestamp: Utc::now(),
            success: true,
            agent_id: None,
            tool_name: None,
            prompt_version: None,
        }
    }

    /// Tool-call event for `tool_name`.
    pub fn tool_call(session_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        let mut event = Self::new(session_id, MetricKind::ToolCall);
        event.tool_name = Some(tool_name.into());
        event
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_tokens(mut self, tokens_in: u64, tokens_out: u64) -> Self {
        self.tokens_in = tokens_in;
        self.tokens_out = tokens_out;
        self
    }

    pub fn with_cost(mut self, cost_estimate: f64) -> Self {
        self.cost_estimate = cost_estimate;
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_prompt_version(mut self, version: u32) -> Self {
        self.prompt_version = Some(version);
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Reject events that would not read back as written.
    ///
    /// JSON has no NaN or infinity, so a non-finite cost would be stored
    /// as `null`.
    pub fn validate(&self) -> Result<(), HubError> {
        if !self.cost_estimate.is_finite() {
            return Err(HubError::InvalidInput(format!(
                "cost_estimate must be finite, got {}",
                self.cost_estimate
            )));
        }
        Ok(())
    }

    /// Get timestamp as milliseconds since Unix epoch
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Counts, sums and duration percentiles over a group of events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub count: u64,
    pub failures: u64,
    pub duration_ms_total: u64,
    pub tokens_in_total: u64,
    pub tokens_out_total: u64,
    pub cost_total: f64,
    pub duration_ms_p50: u64,
    pub duration_ms_p90: u64,
    pub duration_ms_p99: u64,
}

/// Immutable snapshot written by an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub range: TimeRange,
    pub total: Aggregate,
    pub by_kind: BTreeMap<MetricKind, Aggregate>,
    pub by_session: BTreeMap<String, Aggregate>,
    /// Events this process dropped before export (local counter)
    pub dropped_events: u64,
}

impl MetricsReport {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Number of events of `kind`, zero when absent.
    pub fn count_of(&self, kind: MetricKind) -> u64 {
        self.by_kind.get(&kind).map_or(0, |a| a.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_range_is_half_open() {
        let start = Utc.timestamp_millis_opt(1_000).unwrap();
        let end = Utc.timestamp_millis_opt(2_000).unwrap();
        let range = TimeRange::new(start, end);
        assert!(range.contains(start));
        assert!(!range.contains(end));
        assert!(!TimeRange::new(end, start).contains(start));
        assert!(TimeRange::new(end, start).is_empty());
    }

    #[test]
    fn test_event_builder_defaults() {
        let event = MetricEvent::tool_call("s1", "write_post")
            .with_duration(40)
            .with_tokens(100, 20);
        assert_eq!(event.kind, MetricKind::ToolCall);
        assert!(event.success);
        assert_eq!(event.tool_name.as_deref(), Some("write_post"));

        let decoded = MetricEvent::from_bytes(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_non_finite_cost_rejected() {
        for cost in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let event = MetricEvent::new("s1", MetricKind::Generation).with_cost(cost);
            assert!(matches!(event.validate(), Err(HubError::InvalidInput(_))));
        }
        let event = MetricEvent::new("s1", MetricKind::Generation).with_cost(0.25);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_event_missing_measures_default_to_zero() {
        let json = r#"{"session_id":"s","kind":"error","timestamp":"2025-01-01T00:00:00Z"}"#;
        let event = MetricEvent::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(event.kind, MetricKind::Error);
        assert_eq!(event.tokens_in, 0);
        assert!(event.success);
    }

    #[test]
    fn test_report_kind_keys_serialize_as_strings() {
        let mut by_kind = BTreeMap::new();
        by_kind.insert(
            MetricKind::Generation,
            Aggregate {
                count: 2,
                ..Aggregate::default()
            },
        );
        let report = MetricsReport {
            report_id: "r".to_string(),
            generated_at: Utc::now(),
            range: TimeRange::new(Utc::now(), Utc::now()),
            total: Aggregate::default(),
            by_kind,
            by_session: BTreeMap::new(),
            dropped_events: 0,
        };
        let value: serde_json::Value =
            serde_json::from_slice(&report.to_bytes().unwrap()).unwrap();
        assert_eq!(value["by_kind"]["generation"]["count"], 2);
        assert_eq!(report.count_of(MetricKind::Generation), 2);
        assert_eq!(report.count_of(MetricKind::Error), 0);
    }
}
