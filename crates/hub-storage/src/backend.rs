//! The storage contract every backend implements.

use async_trait::async_trait;

use crate::error::StorageError;

/// Opaque version token of a stored payload.
///
/// Tokens are only meaningful to the backend that issued them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionToken(pub String);

impl VersionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Precondition attached to a put.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace whatever is there
    #[default]
    Overwrite,
    /// Succeed only if the key does not exist
    CreateOnly,
    /// Succeed only if the current version matches
    IfVersion(VersionToken),
}

/// Options for [`StorageBackend::put`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub mode: WriteMode,
    /// Content type; derived from the key's extension when unset
    pub content_type: Option<String>,
}

impl WriteOptions {
    pub fn overwrite() -> Self {
        Self::default()
    }

    pub fn create_only() -> Self {
        Self {
            mode: WriteMode::CreateOnly,
            content_type: None,
        }
    }

    pub fn if_version(token: VersionToken) -> Self {
        Self {
            mode: WriteMode::IfVersion(token),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A payload read back from a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    pub key: String,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub version: Option<VersionToken>,
}

/// Content type for a key, from its extension.
pub fn content_type_for(key: &str) -> String {
    mime_guess::from_path(key)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Uniform key/value + prefix listing contract.
///
/// Implementations must agree on every observable behavior: absent keys
/// are `NotFound`, lost preconditions are `Conflict`, infrastructure
/// failures are `BackendUnavailable`, and listings are lexicographic.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Store `payload` under `key`, honoring `opts.mode`.
    async fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        opts: WriteOptions,
    ) -> Result<VersionToken, StorageError>;

    /// Read the current payload of `key`.
    async fn get(&self, key: &str) -> Result<StorageObject, StorageError>;

    /// Read a prior version of `key`.
    async fn get_version(
        &self,
        key: &str,
        version: &VersionToken,
    ) -> Result<StorageObject, StorageError>;

    /// Keys starting with `prefix` and strictly greater than `after`,
    /// in lexicographic order.
    async fn list_after(
        &self,
        prefix: &str,
        after: Option<&str>,
    ) -> Result<Vec<String>, StorageError>;

    /// Remove `key`.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Every key starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.list_after(prefix, None).await
    }

    /// Whether `key` currently exists.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
