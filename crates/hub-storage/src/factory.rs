//! Backend selection from settings.

use std::sync::Arc;
use tracing::info;

use hub_types::Settings;

use crate::backend::StorageBackend;
use crate::error::StorageError;
use crate::local::LocalBackend;
use crate::object::ObjectStoreBackend;
use crate::timeout::TimeoutBackend;

/// Open the configured backend, wrapped in the request timeout.
///
/// `use_object_store = false` (the default) selects the local filesystem.
pub async fn open_backend(settings: &Settings) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let inner: Arc<dyn StorageBackend> = if settings.use_object_store {
        Arc::new(ObjectStoreBackend::from_settings(&settings.object_store)?)
    } else {
        let root = settings.local.expanded_root();
        Arc::new(
            LocalBackend::open(root)
                .await?
                .with_retain_versions(settings.local.retain_versions),
        )
    };

    info!(
        backend = inner.name(),
        request_timeout_ms = settings.timeouts.request_ms,
        "Storage backend ready"
    );
    Ok(Arc::new(TimeoutBackend::new(inner, settings.timeouts.request())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::WriteOptions;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_defaults_to_local() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::local_at(temp.path());
        let backend = open_backend(&settings).await.unwrap();
        assert_eq!(backend.name(), "local");

        backend
            .put("registry/a.json", b"{}".to_vec(), WriteOptions::overwrite())
            .await
            .unwrap();
        assert!(temp.path().join("registry").join("a.json").exists());
    }

    #[tokio::test]
    async fn test_object_store_requires_bucket() {
        let temp = TempDir::new().unwrap();
        let mut settings = Settings::local_at(temp.path());
        settings.use_object_store = true;
        assert!(matches!(
            open_backend(&settings).await,
            Err(StorageError::BackendUnavailable(_))
        ));
    }
}
