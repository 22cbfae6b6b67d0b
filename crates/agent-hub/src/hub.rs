//! The Hub: one backend, four stores.

use hub_storage::{open_backend, StorageBackend};
use hub_types::{HubError, MetricEvent, SessionEvent, Settings};
use std::sync::Arc;
use tracing::info;

use crate::metrics::MetricsCollector;
use crate::prompts::PromptVersionStore;
use crate::registry::AgentRegistry;
use crate::retry::RetryPolicy;
use crate::sessions::SessionStore;

pub struct Hub {
    backend: Arc<dyn StorageBackend>,
    sessions: SessionStore,
    metrics: MetricsCollector,
    prompts: PromptVersionStore,
    registry: AgentRegistry,
}

impl Hub {
    /// Open the configured backend and build every store over it.
    pub async fn open(settings: &Settings) -> Result<Self, HubError> {
        settings.validate()?;
        let backend = open_backend(settings).await?;
        Ok(Self::with_backend(backend, settings))
    }

    /// Build the stores over an existing backend.
    pub fn with_backend(backend: Arc<dyn StorageBackend>, settings: &Settings) -> Self {
        let retry = RetryPolicy::from(&settings.retry);
        info!(backend = backend.name(), "Agent hub ready");
        Self {
            sessions: SessionStore::new(backend.clone(), retry.clone()),
            metrics: MetricsCollector::new(backend.clone(), settings.timeouts.metrics_record()),
            prompts: PromptVersionStore::new(backend.clone(), retry.clone()),
            registry: AgentRegistry::new(backend.clone(), retry),
            backend,
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn prompts(&self) -> &PromptVersionStore {
        &self.prompts
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Log one tool call to its session and record a matching metric.
    ///
    /// The session append is reported; the metric is fire-and-forget.
    pub async fn record_tool_call(
        &self,
        session_id: &str,
        tool_name: &str,
        input: &serde_json::Value,
        output: &str,
        duration_ms: u64,
        success: bool,
    ) -> Result<(), HubError> {
        let event = SessionEvent::tool_call(tool_name, input, output, duration_ms, success);
        let mut metric = MetricEvent::tool_call(session_id, tool_name)
            .with_duration(duration_ms)
            .at(event.timestamp);
        if !event.success {
            metric = metric.failed();
        }

        self.sessions.append(session_id, event).await?;
        self.metrics.record(metric).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_storage::MemoryBackend;
    use hub_types::{MetricKind, SessionStatus, TimeRange};
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_local_hub() {
        let temp = TempDir::new().unwrap();
        let hub = Hub::open(&Settings::local_at(temp.path())).await.unwrap();
        assert_eq!(hub.backend().name(), "local");

        let version = hub.prompts().put("greeting", "Hello", "").await.unwrap();
        assert_eq!(version, 1);
        assert!(temp
            .path()
            .join("prompts")
            .join("greeting")
            .join("0000000001.json")
            .exists());
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_settings() {
        let temp = TempDir::new().unwrap();
        let mut settings = Settings::local_at(temp.path());
        settings.retry.max_attempts = 0;
        assert!(matches!(
            Hub::open(&settings).await,
            Err(HubError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_record_tool_call_logs_and_measures() {
        let hub = Hub::with_backend(Arc::new(MemoryBackend::new()), &Settings::default());
        let started = chrono::Utc::now();
        let session_id = hub.sessions().open().await.unwrap();

        let images: Vec<String> = (0..12).map(|i| format!("img/{i}.png")).collect();
        hub.record_tool_call(
            &session_id,
            "analyze_images",
            &json!({ "paths": images }),
            "Error: rate limited",
            80,
            true,
        )
        .await
        .unwrap();
        hub.sessions()
            .close(&session_id, SessionStatus::Failed)
            .await
            .unwrap();

        let events = hub.sessions().read(&session_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].input_summary.contains("[12 items]"));
        assert!(!events[0].success);

        let report = hub
            .metrics()
            .export(TimeRange::new(
                started - chrono::Duration::seconds(1),
                chrono::Utc::now() + chrono::Duration::seconds(1),
            ))
            .await
            .unwrap();
        assert_eq!(report.count_of(MetricKind::ToolCall), 1);
        assert_eq!(report.total.failures, 1);
    }
}
