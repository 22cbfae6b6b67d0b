//! End-to-end test infrastructure for the Agent Hub.
//!
//! Provides a shared TestHarness that builds a Hub over any backend kind,
//! so every scenario can be run against all of them.

use std::sync::Arc;

use agent_hub::Hub;
use chrono::{DateTime, TimeZone, Utc};
use hub_storage::{LocalBackend, MemoryBackend, ObjectStoreBackend, StorageBackend};
use hub_types::{ConditionalPut, MetricEvent, MetricKind, Settings};
use object_store::memory::InMemory;

/// Backend a harness runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Memory,
    /// In-memory object store using native conditional put
    ObjectNative,
    /// In-memory object store using lease-emulated conditional put
    ObjectLease,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Local,
        BackendKind::Memory,
        BackendKind::ObjectNative,
        BackendKind::ObjectLease,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Memory => "memory",
            BackendKind::ObjectNative => "object-native",
            BackendKind::ObjectLease => "object-lease",
        }
    }
}

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub kind: BackendKind,
    pub settings: Settings,
    pub backend: Arc<dyn StorageBackend>,
    /// Set for `BackendKind::Memory`, for fault injection
    pub memory: Option<Arc<MemoryBackend>>,
    pub hub: Hub,
}

impl TestHarness {
    /// Create a harness over `kind` with a fresh, empty store.
    pub async fn new(kind: BackendKind) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let mut settings = Settings::local_at(temp_dir.path().join("store"));
        // racing writers in one process collide far more than real agents do
        settings.retry.max_attempts = 64;
        settings.retry.initial_backoff_ms = 2;
        settings.retry.max_backoff_ms = 100;
        settings.timeouts.metrics_record_ms = 5_000;

        let mut memory = None;
        let backend: Arc<dyn StorageBackend> = match kind {
            BackendKind::Local => Arc::new(
                LocalBackend::open(settings.local.expanded_root())
                    .await
                    .expect("Failed to open local backend"),
            ),
            BackendKind::Memory => {
                let backend = Arc::new(MemoryBackend::new());
                memory = Some(backend.clone());
                backend
            }
            BackendKind::ObjectNative => Arc::new(ObjectStoreBackend::new(
                Arc::new(InMemory::new()),
                ConditionalPut::Native,
            )),
            BackendKind::ObjectLease => Arc::new(ObjectStoreBackend::new(
                Arc::new(InMemory::new()),
                ConditionalPut::Lease,
            )),
        };

        let hub = Hub::with_backend(backend.clone(), &settings);
        Self {
            _temp_dir: temp_dir,
            kind,
            settings,
            backend,
            memory,
            hub,
        }
    }

    /// Harness over the local filesystem backend.
    pub async fn local() -> Self {
        Self::new(BackendKind::Local).await
    }

    /// Harness over the in-memory backend with fault injection.
    pub async fn memory() -> Self {
        Self::new(BackendKind::Memory).await
    }

    /// Fault-injection handle; panics for other backend kinds.
    pub fn faults(&self) -> &MemoryBackend {
        self.memory
            .as_deref()
            .expect("fault injection needs BackendKind::Memory")
    }
}

/// Fixed base timestamp for generated events (2024-01-29 approx).
pub const BASE_TS_MS: i64 = 1_706_540_400_000;

pub fn ts(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

/// Create `count` metric events for one session, 100ms apart from
/// `BASE_TS_MS`, cycling through every kind.
pub fn create_test_metrics(session_id: &str, count: usize) -> Vec<MetricEvent> {
    const KINDS: [MetricKind; 3] = [MetricKind::ToolCall, MetricKind::Generation, MetricKind::Error];
    (0..count)
        .map(|i| {
            MetricEvent::new(session_id, KINDS[i % KINDS.len()])
                .with_duration(10 * (i as u64 + 1))
                .with_tokens(100, 20)
                .at(ts(BASE_TS_MS + i as i64 * 100))
        })
        .collect()
}
