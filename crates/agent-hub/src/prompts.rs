//! Prompt version store.
//!
//! Versions of a prompt are numbered 1, 2, 3... with no gaps. A new version
//! is claimed with a create-only write at `max + 1`; a writer that loses the
//! race re-lists and tries the next number.

use hub_storage::keys::PROMPTS_PREFIX;
use hub_storage::{PromptKey, StorageBackend, WriteOptions};
use hub_types::{HubError, PromptVersion};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::retry::{retry_on_conflict, RetryPolicy};

pub struct PromptVersionStore {
    backend: Arc<dyn StorageBackend>,
    retry: RetryPolicy,
}

impl PromptVersionStore {
    pub fn new(backend: Arc<dyn StorageBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Store `content` as the next version of `name`.
    pub async fn put(&self, name: &str, content: &str, note: &str) -> Result<u32, HubError> {
        PromptKey::prefix(name)?;
        let version = retry_on_conflict(&self.retry, "prompt put", move || async move {
            let next = self.latest_version(name).await?.map_or(1, |v| v + 1);
            self.create(&PromptVersion::new(name, next, content, note))
                .await?;
            Ok(next)
        })
        .await?;

        info!(name = %name, version, "Stored prompt version");
        Ok(version)
    }

    /// Highest version of `name`.
    pub async fn get(&self, name: &str) -> Result<PromptVersion, HubError> {
        match self.latest_version(name).await? {
            Some(version) => self.get_version(name, version).await,
            None => Err(HubError::NotFound(format!("prompt {}", name))),
        }
    }

    pub async fn get_version(&self, name: &str, version: u32) -> Result<PromptVersion, HubError> {
        let key = PromptKey::new(name, version)?.to_key();
        let object = self.backend.get(&key).await?;
        PromptVersion::from_bytes(&object.payload)
            .map_err(|e| HubError::Corrupt(format!("{}: {}", key, e)))
    }

    /// Create version 1 unless the prompt already has versions.
    ///
    /// Returns whichever version is current afterwards.
    pub async fn ensure_exists(
        &self,
        name: &str,
        content: &str,
        note: &str,
    ) -> Result<PromptVersion, HubError> {
        if self.latest_version(name).await?.is_some() {
            return self.get(name).await;
        }
        let initial = PromptVersion::new(name, 1, content, note);
        match self.create(&initial).await {
            Ok(()) => {
                info!(name = %name, "Created initial prompt version");
                Ok(initial)
            }
            // someone else created it first
            Err(e) if e.is_conflict() => self.get(name).await,
            Err(e) => Err(e),
        }
    }

    /// Current content of `name`, or `fallback` when it cannot be read.
    pub async fn current_or(&self, name: &str, fallback: &str) -> String {
        match self.get(name).await {
            Ok(prompt) => prompt.content,
            Err(e) if e.is_not_found() => {
                debug!(name = %name, "Prompt not stored, using fallback");
                fallback.to_string()
            }
            Err(e) => {
                warn!(name = %name, error = %e, "Prompt unavailable, using fallback");
                fallback.to_string()
            }
        }
    }

    /// Every version of `name`, oldest first.
    pub async fn history(&self, name: &str) -> Result<Vec<PromptVersion>, HubError> {
        let mut versions = Vec::new();
        for version in self.versions(name).await? {
            versions.push(self.get_version(name, version).await?);
        }
        Ok(versions)
    }

    /// Names of every stored prompt.
    pub async fn names(&self) -> Result<Vec<String>, HubError> {
        let keys = self.backend.list(PROMPTS_PREFIX).await?;
        let mut names: Vec<String> = keys
            .iter()
            .filter_map(|key| PromptKey::from_key(key).ok())
            .map(|key| key.name)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn versions(&self, name: &str) -> Result<Vec<u32>, HubError> {
        let prefix = PromptKey::prefix(name)?;
        let keys = self.backend.list(&prefix).await?;
        Ok(keys
            .iter()
            .filter_map(|key| PromptKey::from_key(key).ok())
            .map(|key| key.version)
            .collect())
    }

    async fn latest_version(&self, name: &str) -> Result<Option<u32>, HubError> {
        Ok(self.versions(name).await?.into_iter().max())
    }

    async fn create(&self, prompt: &PromptVersion) -> Result<(), HubError> {
        let key = PromptKey::new(prompt.name.as_str(), prompt.version)?.to_key();
        self.backend
            .put(&key, prompt.to_bytes()?, WriteOptions::create_only())
            .await?;
        Ok(())
    }
}
