//! Metrics collection and export.
//!
//! Key design principles:
//! - `record` is fire-and-forget: bounded by its own timeout, never returns
//!   an error, never blocks the agent for longer than that timeout
//! - dropped events are counted locally and logged, never retried
//! - every event is its own object keyed by timestamp, so an export range
//!   maps to one contiguous listing
//! - reports are new immutable objects; an export never rewrites events

use chrono::Utc;
use hub_storage::keys::{METRIC_EVENTS_PREFIX, METRIC_REPORTS_PREFIX};
use hub_storage::{MetricEventKey, ReportKey, StorageBackend, WriteOptions};
use hub_types::{Aggregate, HubError, MetricEvent, MetricKind, MetricsReport, TimeRange};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Local counters of one collector.
#[derive(Debug, Default)]
struct CollectorCounters {
    recorded: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of collector counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorStats {
    pub recorded: u64,
    pub dropped: u64,
}

impl CollectorStats {
    /// Total `record` calls seen.
    pub fn attempted(&self) -> u64 {
        self.recorded + self.dropped
    }
}

pub struct MetricsCollector {
    backend: Arc<dyn StorageBackend>,
    record_timeout: Duration,
    counters: CollectorCounters,
}

impl MetricsCollector {
    pub fn new(backend: Arc<dyn StorageBackend>, record_timeout: Duration) -> Self {
        Self {
            backend,
            record_timeout,
            counters: CollectorCounters::default(),
        }
    }

    /// Persist one event, or drop it.
    ///
    /// Any failure, including the record timeout or a non-finite measure,
    /// drops the event and increments the dropped counter.
    pub async fn record(&self, event: MetricEvent) {
        match timeout(self.record_timeout, self.write_event(&event)).await {
            Ok(Ok(key)) => {
                self.counters.recorded.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, kind = %event.kind, "Recorded metric event");
            }
            Ok(Err(e)) => self.drop_event(&event, &e.to_string()),
            Err(_) => self.drop_event(
                &event,
                &format!("timed out after {}ms", self.record_timeout.as_millis()),
            ),
        }
    }

    pub fn stats(&self) -> CollectorStats {
        CollectorStats {
            recorded: self.counters.recorded.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Aggregate every event with a timestamp in `[start, end)` and store
    /// the result as a new report.
    pub async fn export(&self, range: TimeRange) -> Result<MetricsReport, HubError> {
        if range.end < range.start {
            return Err(HubError::InvalidInput(format!(
                "export range ends before it starts: {} .. {}",
                range.start, range.end
            )));
        }
        let start_ms = range.start.timestamp_millis();
        let end_ms = range.end.timestamp_millis();

        let cursor = MetricEventKey::cursor_before(start_ms);
        let keys = self
            .backend
            .list_after(METRIC_EVENTS_PREFIX, Some(&cursor))
            .await?;

        let mut total = Accumulator::default();
        let mut by_kind: BTreeMap<MetricKind, Accumulator> = BTreeMap::new();
        let mut by_session: BTreeMap<String, Accumulator> = BTreeMap::new();
        for key in &keys {
            let Ok(parsed) = MetricEventKey::from_key(key) else {
                debug!(key = %key, "Skipping foreign key under metrics/events");
                continue;
            };
            if parsed.timestamp_ms >= end_ms {
                break;
            }
            if parsed.timestamp_ms < start_ms {
                continue;
            }
            let Some(event) = self.read_event(key).await? else {
                continue;
            };
            total.add(&event);
            by_kind.entry(event.kind).or_default().add(&event);
            by_session
                .entry(event.session_id.clone())
                .or_default()
                .add(&event);
        }

        let report_key = ReportKey::new(start_ms, end_ms);
        let report = MetricsReport {
            report_id: report_key.ulid.to_string(),
            generated_at: Utc::now(),
            range,
            total: total.finish(),
            by_kind: by_kind.into_iter().map(|(k, a)| (k, a.finish())).collect(),
            by_session: by_session
                .into_iter()
                .map(|(s, a)| (s, a.finish()))
                .collect(),
            dropped_events: self.stats().dropped,
        };

        let key = report_key.to_key();
        self.backend
            .put(&key, report.to_bytes()?, WriteOptions::create_only())
            .await?;
        info!(
            key = %key,
            events = report.total.count,
            sessions = report.by_session.len(),
            "Exported metrics report"
        );
        Ok(report)
    }

    /// Aggregate every recorded event of one session.
    pub async fn session_summary(&self, session_id: &str) -> Result<Aggregate, HubError> {
        let keys = self.backend.list(METRIC_EVENTS_PREFIX).await?;
        let mut summary = Accumulator::default();
        for key in &keys {
            if let Some(event) = self.read_event(key).await? {
                if event.session_id == session_id {
                    summary.add(&event);
                }
            }
        }
        Ok(summary.finish())
    }

    /// Keys of every stored report, oldest range first.
    pub async fn list_reports(&self) -> Result<Vec<String>, HubError> {
        Ok(self.backend.list(METRIC_REPORTS_PREFIX).await?)
    }

    pub async fn load_report(&self, key: &str) -> Result<MetricsReport, HubError> {
        let object = self.backend.get(key).await?;
        MetricsReport::from_bytes(&object.payload)
            .map_err(|e| HubError::Corrupt(format!("{}: {}", key, e)))
    }

    async fn write_event(&self, event: &MetricEvent) -> Result<String, HubError> {
        event.validate()?;
        let key = MetricEventKey::new(event.timestamp_ms())?.to_key();
        self.backend
            .put(&key, event.to_bytes()?, WriteOptions::create_only())
            .await?;
        Ok(key)
    }

    /// `None` for unreadable events, which are skipped rather than failing
    /// a whole aggregation.
    async fn read_event(&self, key: &str) -> Result<Option<MetricEvent>, HubError> {
        let object = match self.backend.get(key).await {
            Ok(object) => object,
            Err(hub_storage::StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match MetricEvent::from_bytes(&object.payload) {
            Ok(event) => Ok(Some(event)),
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping corrupt metric event");
                Ok(None)
            }
        }
    }

    fn drop_event(&self, event: &MetricEvent, reason: &str) {
        let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            session_id = %event.session_id,
            kind = %event.kind,
            reason,
            dropped_total = dropped,
            "Dropped metric event"
        );
    }
}

/// Running sums plus the durations needed for percentiles.
#[derive(Debug, Default)]
struct Accumulator {
    aggregate: Aggregate,
    durations: Vec<u64>,
}

impl Accumulator {
    fn add(&mut self, event: &MetricEvent) {
        let agg = &mut self.aggregate;
        agg.count += 1;
        if !event.success {
            agg.failures += 1;
        }
        agg.duration_ms_total = agg.duration_ms_total.saturating_add(event.duration_ms);
        agg.tokens_in_total = agg.tokens_in_total.saturating_add(event.tokens_in);
        agg.tokens_out_total = agg.tokens_out_total.saturating_add(event.tokens_out);
        agg.cost_total += event.cost_estimate;
        self.durations.push(event.duration_ms);
    }

    fn finish(mut self) -> Aggregate {
        self.durations.sort_unstable();
        self.aggregate.duration_ms_p50 = nearest_rank(&self.durations, 50);
        self.aggregate.duration_ms_p90 = nearest_rank(&self.durations, 90);
        self.aggregate.duration_ms_p99 = nearest_rank(&self.durations, 99);
        self.aggregate
    }
}

/// Nearest-rank percentile of sorted values; zero for no values.
fn nearest_rank(sorted: &[u64], percentile: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (percentile * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hub_storage::MemoryBackend;
    use pretty_assertions::assert_eq;

    fn ts(ms: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn create_test_collector() -> (MetricsCollector, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let collector = MetricsCollector::new(backend.clone(), Duration::from_millis(100));
        (collector, backend)
    }

    #[test]
    fn test_nearest_rank() {
        let values: Vec<u64> = (1..=10).collect();
        assert_eq!(nearest_rank(&values, 50), 5);
        assert_eq!(nearest_rank(&values, 90), 9);
        assert_eq!(nearest_rank(&values, 99), 10);
        assert_eq!(nearest_rank(&[42], 50), 42);
        assert_eq!(nearest_rank(&[], 99), 0);
    }

    #[tokio::test]
    async fn test_export_counts_events_in_half_open_range() {
        let (collector, _backend) = create_test_collector();
        for ms in [1_000, 1_500, 1_999, 2_000] {
            collector
                .record(MetricEvent::tool_call("s1", "search").with_duration(10).at(ts(ms)))
                .await;
        }
        collector
            .record(
                MetricEvent::new("s2", MetricKind::Generation)
                    .with_tokens(100, 40)
                    .with_cost(0.5)
                    .at(ts(1_200)),
            )
            .await;
        collector
            .record(MetricEvent::new("s2", MetricKind::Error).failed().at(ts(999)))
            .await;

        let report = collector
            .export(TimeRange::new(ts(1_000), ts(2_000)))
            .await
            .unwrap();

        assert_eq!(report.total.count, 4);
        assert_eq!(report.count_of(MetricKind::ToolCall), 3);
        assert_eq!(report.count_of(MetricKind::Generation), 1);
        assert_eq!(report.count_of(MetricKind::Error), 0);
        assert_eq!(report.by_session["s2"].tokens_in_total, 100);
        assert_eq!(report.by_session["s1"].duration_ms_total, 30);
        assert_eq!(report.dropped_events, 0);
    }

    #[tokio::test]
    async fn test_export_writes_new_report_each_time() {
        let (collector, _backend) = create_test_collector();
        collector
            .record(MetricEvent::tool_call("s1", "search").at(ts(1_000)))
            .await;

        let range = TimeRange::new(ts(0), ts(10_000));
        let first = collector.export(range).await.unwrap();
        let second = collector.export(range).await.unwrap();
        assert_ne!(first.report_id, second.report_id);

        let keys = collector.list_reports().await.unwrap();
        assert_eq!(keys.len(), 2);
        let loaded = collector.load_report(&keys[0]).await.unwrap();
        assert_eq!(loaded.total.count, 1);
    }

    #[tokio::test]
    async fn test_non_finite_cost_is_dropped_not_recorded() {
        let (collector, backend) = create_test_collector();
        collector
            .record(
                MetricEvent::new("s1", MetricKind::Generation)
                    .with_cost(f64::NAN)
                    .at(ts(5_000)),
            )
            .await;
        collector
            .record(MetricEvent::new("s1", MetricKind::Generation).with_cost(0.5).at(ts(5_001)))
            .await;

        assert_eq!(
            collector.stats(),
            CollectorStats {
                recorded: 1,
                dropped: 1
            }
        );
        assert_eq!(backend.list(METRIC_EVENTS_PREFIX).await.unwrap().len(), 1);

        let report = collector
            .export(TimeRange::new(ts(0), ts(10_000)))
            .await
            .unwrap();
        assert_eq!(report.total.count, collector.stats().recorded);
        assert_eq!(report.dropped_events, 1);
    }

    #[tokio::test]
    async fn test_unavailable_backend_drops_without_error() {
        let (collector, backend) = create_test_collector();
        backend.set_unavailable(true);
        collector.record(MetricEvent::tool_call("s1", "search")).await;
        collector.record(MetricEvent::tool_call("s1", "search")).await;

        assert_eq!(
            collector.stats(),
            CollectorStats {
                recorded: 0,
                dropped: 2
            }
        );

        backend.set_unavailable(false);
        collector.record(MetricEvent::tool_call("s1", "search")).await;
        assert_eq!(collector.stats().recorded, 1);
        assert_eq!(collector.stats().attempted(), 3);
    }

    #[tokio::test]
    async fn test_slow_backend_drops_after_record_timeout() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_latency(Duration::from_millis(500));
        let collector = MetricsCollector::new(backend.clone(), Duration::from_millis(20));

        let started = std::time::Instant::now();
        collector.record(MetricEvent::tool_call("s1", "search")).await;
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(collector.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_session_summary() {
        let (collector, _backend) = create_test_collector();
        for duration in [10, 20, 30] {
            collector
                .record(MetricEvent::tool_call("s1", "search").with_duration(duration))
                .await;
        }
        collector
            .record(MetricEvent::tool_call("s2", "search").with_duration(999))
            .await;

        let summary = collector.session_summary("s1").await.unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.duration_ms_total, 60);
        assert_eq!(summary.duration_ms_p50, 20);
    }

    #[tokio::test]
    async fn test_reversed_range_rejected() {
        let (collector, _backend) = create_test_collector();
        let err = collector
            .export(TimeRange::new(ts(2_000), ts(1_000)))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_dangling_session_id_is_valid() {
        let (collector, _backend) = create_test_collector();
        collector
            .record(MetricEvent::tool_call("never-opened", "search").at(ts(5_000)))
            .await;
        let report = collector
            .export(TimeRange::new(ts(0), ts(10_000)))
            .await
            .unwrap();
        assert_eq!(report.by_session["never-opened"].count, 1);
    }
}
