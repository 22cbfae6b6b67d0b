//! Per-call timeout decorator.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::backend::{StorageBackend, StorageObject, VersionToken, WriteOptions};
use crate::error::StorageError;

/// Bounds every call of the wrapped backend; a call that exceeds the
/// limit fails with `BackendUnavailable`.
///
/// A timed-out write may still land. Callers treat it like any other
/// unavailable backend and retry or drop.
pub struct TimeoutBackend {
    inner: Arc<dyn StorageBackend>,
    limit: Duration,
}

impl TimeoutBackend {
    pub fn new(inner: Arc<dyn StorageBackend>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    async fn bounded<T>(
        &self,
        op: &str,
        key: &str,
        fut: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    backend = self.inner.name(),
                    op,
                    key = %key,
                    limit_ms = self.limit.as_millis() as u64,
                    "Backend call timed out"
                );
                Err(StorageError::BackendUnavailable(format!(
                    "{} {} timed out after {:?}",
                    op, key, self.limit
                )))
            }
        }
    }
}

#[async_trait]
impl StorageBackend for TimeoutBackend {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        opts: WriteOptions,
    ) -> Result<VersionToken, StorageError> {
        self.bounded("put", key, self.inner.put(key, payload, opts))
            .await
    }

    async fn get(&self, key: &str) -> Result<StorageObject, StorageError> {
        self.bounded("get", key, self.inner.get(key)).await
    }

    async fn get_version(
        &self,
        key: &str,
        version: &VersionToken,
    ) -> Result<StorageObject, StorageError> {
        self.bounded("get_version", key, self.inner.get_version(key, version))
            .await
    }

    async fn list_after(
        &self,
        prefix: &str,
        after: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        self.bounded("list", prefix, self.inner.list_after(prefix, after))
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.bounded("delete", key, self.inner.delete(key)).await
    }
}
