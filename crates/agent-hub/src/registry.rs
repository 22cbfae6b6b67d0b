//! Agent registry.
//!
//! One object per agent under `registry/<name>.json`. The last registration
//! wins. Every write is a version-checked swap inside the conflict retry
//! loop, so neither `register` nor a concurrent `record_run` can lose a run
//! count.

use chrono::Utc;
use hub_storage::keys::REGISTRY_PREFIX;
use hub_storage::{RegistryKey, StorageBackend, StorageError, VersionToken, WriteOptions};
use hub_types::{HubError, RegistryEntry};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::retry::{retry_on_conflict, RetryPolicy};

pub struct AgentRegistry {
    backend: Arc<dyn StorageBackend>,
    retry: RetryPolicy,
}

impl AgentRegistry {
    pub fn new(backend: Arc<dyn StorageBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Store `entry` under its name, stamping `last_seen`.
    ///
    /// Run counters of an existing entry carry over when `entry` has none
    /// of its own. An unreadable entry is replaced.
    pub async fn register(&self, entry: RegistryEntry) -> Result<RegistryEntry, HubError> {
        let key = RegistryKey::new(entry.name.as_str())?.to_key();
        let (key, template) = (key.as_str(), &entry);
        let entry = retry_on_conflict(&self.retry, "registry register", move || async move {
            let mut entry = template.clone();
            let opts = match self.read(key).await {
                Ok((previous, version)) => {
                    if entry.run_count == 0 {
                        entry.run_count = previous.run_count;
                        entry.failure_count = previous.failure_count;
                        entry.last_run_id = previous.last_run_id;
                        entry.last_run_at = previous.last_run_at;
                    }
                    match version {
                        Some(version) => WriteOptions::if_version(version),
                        None => WriteOptions::overwrite(),
                    }
                }
                Err(HubError::NotFound(_)) => WriteOptions::create_only(),
                Err(HubError::Corrupt(msg)) => {
                    warn!(name = %entry.name, error = %msg, "Replacing unreadable registry entry");
                    WriteOptions::overwrite()
                }
                Err(e) => return Err(e),
            };
            entry.last_seen = Utc::now();
            self.backend.put(key, entry.to_bytes()?, opts).await?;
            Ok(entry)
        })
        .await?;

        info!(name = %entry.name, provider = %entry.provider, "Registered agent");
        Ok(entry)
    }

    pub async fn lookup(&self, name: &str) -> Result<RegistryEntry, HubError> {
        let key = RegistryKey::new(name)?.to_key();
        Ok(self.read(&key).await?.0)
    }

    /// Every entry, ordered by agent name.
    ///
    /// An unreadable entry fails the whole listing with `Corrupt`.
    pub async fn list(&self) -> Result<Vec<RegistryEntry>, HubError> {
        let keys = self.backend.list(REGISTRY_PREFIX).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in &keys {
            if RegistryKey::from_key(key).is_err() {
                continue;
            }
            match self.read(key).await {
                Ok((entry, _)) => entries.push(entry),
                // deregistered since the listing
                Err(HubError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        // key order differs from name order once names contain '-' or '.'
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Count one run of `name`.
    pub async fn record_run(
        &self,
        name: &str,
        run_id: &str,
        success: bool,
    ) -> Result<RegistryEntry, HubError> {
        let key = RegistryKey::new(name)?.to_key();
        let key = key.as_str();
        let entry = retry_on_conflict(&self.retry, "registry run", move || async move {
            let (mut entry, version) = self.read(key).await?;
            entry.record_run(run_id, success);
            let opts = match version {
                Some(version) => WriteOptions::if_version(version),
                None => WriteOptions::overwrite(),
            };
            self.backend.put(key, entry.to_bytes()?, opts).await?;
            Ok(entry)
        })
        .await?;

        debug!(name = %name, run_id = %run_id, success, runs = entry.run_count, "Recorded agent run");
        Ok(entry)
    }

    pub async fn deregister(&self, name: &str) -> Result<(), HubError> {
        let key = RegistryKey::new(name)?.to_key();
        self.backend.delete(&key).await?;
        info!(name = %name, "Deregistered agent");
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<(RegistryEntry, Option<VersionToken>), HubError> {
        let object = self.backend.get(key).await.map_err(|e| match e {
            StorageError::NotFound(_) => HubError::NotFound(format!("agent {}", key)),
            other => other.into(),
        })?;
        let entry = RegistryEntry::from_bytes(&object.payload)
            .map_err(|e| HubError::Corrupt(format!("{}: {}", key, e)))?;
        Ok((entry, object.version))
    }
}
