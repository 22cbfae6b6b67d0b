//! Local filesystem backend.
//!
//! Keys map to relative paths under a root directory. Every write lands in
//! a hidden temp file next to its target first, then is published:
//! - create-only: `hard_link(temp, target)`, which fails if the target exists
//! - overwrite: `rename(temp, target)`, atomic replace
//! - if-version: overwrite while holding an exclusive `.lock` file
//!
//! Readers therefore never observe a partially written payload. Overwritten
//! and deleted payloads are kept as hard links under
//! `<root>/.versions/<key>/<token>` unless version retention is disabled.
//! Hidden names (leading `.`) never appear in listings.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use ulid::Ulid;
use walkdir::WalkDir;

use crate::backend::{
    content_type_for, StorageBackend, StorageObject, VersionToken, WriteMode, WriteOptions,
};
use crate::error::StorageError;
use crate::keys::{prefix_dir, validate_key, validate_prefix};

const VERSIONS_DIR: &str = ".versions";

/// Lock files older than this are assumed to belong to a crashed writer.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

pub struct LocalBackend {
    root: PathBuf,
    retain_versions: bool,
}

impl LocalBackend {
    /// Open (creating if necessary) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        info!("Opening local storage at {:?}", root);
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::BackendUnavailable(format!("create {}: {}", root.display(), e))
        })?;
        Ok(Self {
            root,
            retain_versions: true,
        })
    }

    /// Keep or discard overwritten payloads.
    pub fn with_retain_versions(mut self, retain: bool) -> Self {
        self.retain_versions = retain;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(join_key(&self.root, key))
    }

    fn version_path(&self, key: &str, token: &VersionToken) -> PathBuf {
        join_key(&self.root.join(VERSIONS_DIR), key).join(token.as_str())
    }

    async fn write_temp(&self, key: &str, path: &Path, payload: &[u8]) -> Result<PathBuf, StorageError> {
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::Key(format!("key has no parent: {}", key)))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;

        let tmp = sibling(path, &format!("{}.tmp", Ulid::new()));
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .await
            .map_err(|e| StorageError::BackendUnavailable(format!("{}: {}", key, e)))?;
        let written = async {
            file.write_all(payload).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::BackendUnavailable(format!("{}: {}", key, e)));
        }
        Ok(tmp)
    }

    async fn current_token(&self, key: &str, path: &Path) -> Result<Option<VersionToken>, StorageError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(token_of(&meta))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::from_io(key, e)),
        }
    }

    /// Hard-link the current payload into the versions tree.
    async fn preserve_previous(&self, key: &str, path: &Path) -> Result<(), StorageError> {
        if !self.retain_versions {
            return Ok(());
        }
        let Some(token) = self.current_token(key, path).await? else {
            return Ok(());
        };
        let target = self.version_path(key, &token);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io(key, e))?;
        }
        match tokio::fs::hard_link(path, &target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            // replaced underneath us; nothing left to keep
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(key, e)),
        }
    }

    async fn publish_new(&self, key: &str, tmp: &Path, path: &Path) -> Result<(), StorageError> {
        tokio::fs::hard_link(tmp, path)
            .await
            .map_err(|e| StorageError::from_io(key, e))
    }

    async fn publish_replace(&self, key: &str, tmp: &Path, path: &Path) -> Result<(), StorageError> {
        self.preserve_previous(key, path).await?;
        tokio::fs::rename(tmp, path)
            .await
            .map_err(|e| StorageError::from_io(key, e))
    }

    async fn publish_if_version(
        &self,
        key: &str,
        tmp: &Path,
        path: &Path,
        expected: &VersionToken,
    ) -> Result<(), StorageError> {
        let lock = sibling(path, "lock");
        acquire_lock(key, &lock).await?;

        let result = async {
            match self.current_token(key, path).await? {
                Some(current) if &current == expected => self.publish_replace(key, tmp, path).await,
                Some(current) => Err(StorageError::Conflict(format!(
                    "{} is at version {}, expected {}",
                    key, current, expected
                ))),
                None => Err(StorageError::Conflict(format!(
                    "{} does not exist, expected version {}",
                    key, expected
                ))),
            }
        }
        .await;

        if let Err(e) = tokio::fs::remove_file(&lock).await {
            warn!(key = %key, error = %e, "Failed to release lock file");
        }
        result
    }

    async fn read_object(&self, key: &str, path: &Path) -> Result<StorageObject, StorageError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;
        // token and payload come from the same open handle
        let meta = file
            .metadata()
            .await
            .map_err(|e| StorageError::from_io(key, e))?;
        let mut payload = Vec::with_capacity(meta.len() as usize);
        file.read_to_end(&mut payload)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;

        Ok(StorageObject {
            key: key.to_string(),
            payload,
            content_type: content_type_for(key),
            version: Some(token_of(&meta)),
        })
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        opts: WriteOptions,
    ) -> Result<VersionToken, StorageError> {
        let path = self.path_for(key)?;
        let tmp = self.write_temp(key, &path, &payload).await?;

        let published = match &opts.mode {
            WriteMode::CreateOnly => self.publish_new(key, &tmp, &path).await,
            WriteMode::Overwrite => self.publish_replace(key, &tmp, &path).await,
            WriteMode::IfVersion(expected) => {
                self.publish_if_version(key, &tmp, &path, expected).await
            }
        };

        // gone already after a rename
        let _ = tokio::fs::remove_file(&tmp).await;
        published?;

        let token = self
            .current_token(key, &path)
            .await?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        debug!(key = %key, bytes = payload.len(), version = %token, "Stored object");
        Ok(token)
    }

    async fn get(&self, key: &str) -> Result<StorageObject, StorageError> {
        let path = self.path_for(key)?;
        self.read_object(key, &path).await
    }

    async fn get_version(
        &self,
        key: &str,
        version: &VersionToken,
    ) -> Result<StorageObject, StorageError> {
        let path = self.path_for(key)?;
        if self.current_token(key, &path).await?.as_ref() == Some(version) {
            return self.read_object(key, &path).await;
        }
        let mut object = self
            .read_object(key, &self.version_path(key, version))
            .await?;
        object.version = Some(version.clone());
        Ok(object)
    }

    async fn list_after(
        &self,
        prefix: &str,
        after: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        validate_prefix(prefix)?;
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let after = after.map(str::to_string);

        tokio::task::spawn_blocking(move || walk_keys(&root, &prefix, after.as_deref()))
            .await
            .map_err(|e| StorageError::BackendUnavailable(format!("listing task failed: {}", e)))?
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        self.preserve_previous(key, &path).await?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;
        debug!(key = %key, "Deleted object");
        Ok(())
    }
}

fn join_key(base: &Path, key: &str) -> PathBuf {
    key.split('/')
        .filter(|s| !s.is_empty())
        .fold(base.to_path_buf(), |path, segment| path.join(segment))
}

/// Hidden sibling of `path`: `.{file_name}.{suffix}`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}", name, suffix))
}

fn token_of(meta: &std::fs::Metadata) -> VersionToken {
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos());
    VersionToken(format!("{:x}-{:x}-{:x}", file_identity(meta), modified, meta.len()))
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> u64 {
    0
}

async fn acquire_lock(key: &str, lock: &Path) -> Result<(), StorageError> {
    for _ in 0..2 {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if !lock_is_stale(lock).await {
                    return Err(StorageError::Conflict(format!("{} is locked", key)));
                }
                warn!(key = %key, "Removing stale lock file");
                let _ = tokio::fs::remove_file(lock).await;
            }
            Err(e) => return Err(StorageError::from_io(key, e)),
        }
    }
    Err(StorageError::Conflict(format!("{} is locked", key)))
}

async fn lock_is_stale(lock: &Path) -> bool {
    tokio::fs::metadata(lock)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .is_some_and(|age| age > LOCK_STALE_AFTER)
}

fn walk_keys(root: &Path, prefix: &str, after: Option<&str>) -> Result<Vec<String>, StorageError> {
    let start = join_key(root, prefix_dir(prefix));
    if !start.is_dir() {
        return Ok(Vec::new());
    }

    let walker = WalkDir::new(&start)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

    let mut keys = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| StorageError::BackendUnavailable(format!("listing {}: {}", prefix, e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(key) = relative_key(root, entry.path()) else {
            debug!(path = ?entry.path(), "Skipping non UTF-8 path");
            continue;
        };
        if !key.starts_with(prefix) || after.is_some_and(|a| key.as_str() <= a) {
            continue;
        }
        keys.push(key);
    }

    keys.sort();
    Ok(keys)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map_or(true, |s| s.starts_with('.'))
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(segments?.join("/"))
}
