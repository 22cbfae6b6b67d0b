//! In-process backend for tests.
//!
//! Holds objects in a `BTreeMap` so listings come out sorted for free.
//! Faults can be injected at runtime: `set_unavailable(true)` fails every
//! call with `BackendUnavailable`, `set_latency` delays every call.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::backend::{
    content_type_for, StorageBackend, StorageObject, VersionToken, WriteMode, WriteOptions,
};
use crate::error::StorageError;
use crate::keys::{validate_key, validate_prefix};

#[derive(Debug, Clone)]
struct Entry {
    payload: Vec<u8>,
    content_type: String,
    version: VersionToken,
}

#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, Entry>>,
    history: RwLock<HashMap<(String, VersionToken), Entry>>,
    generation: AtomicU64,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every subsequent call with `BackendUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().map_or(0, |objects| objects.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn check_faults(&self) -> Result<(), StorageError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::BackendUnavailable(
                "memory backend marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn next_version(&self) -> VersionToken {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        VersionToken(generation.to_string())
    }
}

fn poisoned<T>(_: T) -> StorageError {
    StorageError::BackendUnavailable("memory backend lock poisoned".to_string())
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        opts: WriteOptions,
    ) -> Result<VersionToken, StorageError> {
        validate_key(key)?;
        self.check_faults().await?;

        let mut objects = self.objects.write().map_err(poisoned)?;
        let current = objects.get(key);
        match (&opts.mode, current) {
            (WriteMode::CreateOnly, Some(_)) => {
                return Err(StorageError::Conflict(key.to_string()));
            }
            (WriteMode::IfVersion(expected), Some(entry)) if &entry.version != expected => {
                return Err(StorageError::Conflict(format!(
                    "{} is at version {}, expected {}",
                    key, entry.version, expected
                )));
            }
            (WriteMode::IfVersion(expected), None) => {
                return Err(StorageError::Conflict(format!(
                    "{} does not exist, expected version {}",
                    key, expected
                )));
            }
            _ => {}
        }

        let entry = Entry {
            content_type: opts.content_type.unwrap_or_else(|| content_type_for(key)),
            payload,
            version: self.next_version(),
        };
        let version = entry.version.clone();
        if let Some(previous) = objects.insert(key.to_string(), entry) {
            let mut history = self.history.write().map_err(poisoned)?;
            history.insert((key.to_string(), previous.version.clone()), previous);
        }
        Ok(version)
    }

    async fn get(&self, key: &str) -> Result<StorageObject, StorageError> {
        validate_key(key)?;
        self.check_faults().await?;

        let objects = self.objects.read().map_err(poisoned)?;
        let entry = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(to_object(key, entry))
    }

    async fn get_version(
        &self,
        key: &str,
        version: &VersionToken,
    ) -> Result<StorageObject, StorageError> {
        validate_key(key)?;
        self.check_faults().await?;

        if let Some(entry) = self.objects.read().map_err(poisoned)?.get(key) {
            if &entry.version == version {
                return Ok(to_object(key, entry));
            }
        }
        let history = self.history.read().map_err(poisoned)?;
        history
            .get(&(key.to_string(), version.clone()))
            .map(|entry| to_object(key, entry))
            .ok_or_else(|| StorageError::NotFound(format!("{}@{}", key, version)))
    }

    async fn list_after(
        &self,
        prefix: &str,
        after: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        validate_prefix(prefix)?;
        self.check_faults().await?;

        let objects = self.objects.read().map_err(poisoned)?;
        let lower = match after {
            Some(after) if after >= prefix => Bound::Excluded(after.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };
        Ok(objects
            .range((lower, Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.check_faults().await?;

        let removed = self.objects.write().map_err(poisoned)?.remove(key);
        match removed {
            Some(previous) => {
                let mut history = self.history.write().map_err(poisoned)?;
                history.insert((key.to_string(), previous.version.clone()), previous);
                Ok(())
            }
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }
}

fn to_object(key: &str, entry: &Entry) -> StorageObject {
    StorageObject {
        key: key.to_string(),
        payload: entry.payload.clone(),
        content_type: entry.content_type.clone(),
        version: Some(entry.version.clone()),
    }
}
