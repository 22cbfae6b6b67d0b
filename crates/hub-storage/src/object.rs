//! Object-store backend (S3 and compatible services).
//!
//! Conditional writes use the store's native `If-None-Match: *` /
//! `If-Match` when `ConditionalPut::Native` is configured. For stores
//! without them, `ConditionalPut::Lease` emulates both modes:
//!
//! 1. write a lease object `.leases/<key>/<ulid>`
//! 2. list `.leases/<key>/`, ignoring leases older than the TTL
//! 3. proceed only if ours is the only live lease, else back off
//! 4. re-check the precondition, write, drop the lease
//!
//! Two writers can only both pass step 3 if one listed before the other
//! wrote its lease; the later one then sees the earlier lease, or, once it
//! is gone, the earlier write, and fails the precondition. This needs
//! strongly consistent listing. Clocks matter only for lease expiry, so a
//! crashed writer blocks its key for at most the TTL.

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::path::Path;
use object_store::prefix::PrefixStore;
use object_store::{
    Attribute, Attributes, GetOptions, ObjectMeta, ObjectStore, PutMode, PutOptions, PutPayload,
    PutResult, UpdateVersion,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use ulid::Ulid;

use hub_types::{ConditionalPut, ObjectStoreSettings};

use crate::backend::{
    content_type_for, StorageBackend, StorageObject, VersionToken, WriteMode, WriteOptions,
};
use crate::error::StorageError;
use crate::keys::{prefix_dir, validate_key, validate_prefix};

const LEASES_DIR: &str = ".leases";

/// Separates ETag and object version inside a version token.
const TOKEN_SEPARATOR: char = '|';

pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    conditional_put: ConditionalPut,
    lease_ttl: Duration,
}

impl ObjectStoreBackend {
    /// Wrap an already-built store.
    pub fn new(store: Arc<dyn ObjectStore>, conditional_put: ConditionalPut) -> Self {
        Self {
            store,
            conditional_put,
            lease_ttl: ObjectStoreSettings::default().lease_ttl(),
        }
    }

    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    /// Build an S3 client from settings, with credentials from the
    /// environment (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, ...).
    pub fn from_settings(settings: &ObjectStoreSettings) -> Result<Self, StorageError> {
        let bucket = settings.bucket.as_deref().ok_or_else(|| {
            StorageError::BackendUnavailable("object_store.bucket is not set".to_string())
        })?;

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_allow_http(settings.allow_http);
        if let Some(region) = &settings.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if settings.conditional_put == ConditionalPut::Native {
            builder = builder.with_conditional_put(S3ConditionalPut::ETagMatch);
        }
        let s3 = builder
            .build()
            .map_err(|e| StorageError::BackendUnavailable(format!("S3 client: {}", e)))?;

        let store: Arc<dyn ObjectStore> = match settings.prefix.as_deref().map(str::trim) {
            Some(prefix) if !prefix.trim_matches('/').is_empty() => {
                Arc::new(PrefixStore::new(s3, prefix.trim_matches('/')))
            }
            _ => Arc::new(s3),
        };

        info!(
            bucket = %bucket,
            prefix = ?settings.prefix,
            conditional_put = ?settings.conditional_put,
            "Opened object store"
        );
        Ok(Self::new(store, settings.conditional_put).with_lease_ttl(settings.lease_ttl()))
    }

    async fn head_opt(&self, key: &str, location: &Path) -> Result<Option<ObjectMeta>, StorageError> {
        match self.store.head(location).await {
            Ok(meta) => Ok(Some(meta)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(map_error(key, e)),
        }
    }

    async fn put_native(
        &self,
        key: &str,
        location: &Path,
        payload: PutPayload,
        mode: &WriteMode,
        attributes: Attributes,
    ) -> Result<PutResult, StorageError> {
        let mode = match mode {
            WriteMode::Overwrite => PutMode::Overwrite,
            WriteMode::CreateOnly => PutMode::Create,
            WriteMode::IfVersion(token) => PutMode::Update(parse_token(token)),
        };
        let opts = PutOptions {
            mode,
            attributes,
            ..Default::default()
        };
        self.store
            .put_opts(location, payload, opts)
            .await
            .map_err(|e| match e {
                object_store::Error::NotImplemented => StorageError::BackendUnavailable(format!(
                    "{}: store has no native conditional put, set object_store.conditional_put = \"lease\"",
                    key
                )),
                other => map_error(key, other),
            })
    }

    async fn put_leased(
        &self,
        key: &str,
        location: &Path,
        payload: PutPayload,
        mode: &WriteMode,
        attributes: Attributes,
    ) -> Result<PutResult, StorageError> {
        // fail fast before taking a lease
        self.check_precondition(key, location, mode).await?;

        let lease_dir = lease_dir(key)?;
        let lease_id = Ulid::new();
        let lease = lease_dir.child(lease_id.to_string());
        self.store
            .put(&lease, PutPayload::new())
            .await
            .map_err(|e| map_error(key, e))?;

        let outcome = async {
            let others = self
                .live_leases(key, &lease_dir)
                .await?
                .into_iter()
                .filter(|id| *id != lease_id)
                .count();
            if others > 0 {
                debug!(key = %key, others, "Key is leased by another writer");
                return Err(StorageError::Conflict(format!(
                    "{} is leased by another writer",
                    key
                )));
            }
            self.check_precondition(key, location, mode).await?;
            let opts = PutOptions {
                mode: PutMode::Overwrite,
                attributes,
                ..Default::default()
            };
            self.store
                .put_opts(location, payload, opts)
                .await
                .map_err(|e| map_error(key, e))
        }
        .await;

        if let Err(e) = self.store.delete(&lease).await {
            warn!(key = %key, error = %e, "Failed to release lease");
        }
        outcome
    }

    async fn check_precondition(
        &self,
        key: &str,
        location: &Path,
        mode: &WriteMode,
    ) -> Result<(), StorageError> {
        match mode {
            WriteMode::Overwrite => Ok(()),
            WriteMode::CreateOnly => match self.head_opt(key, location).await? {
                Some(_) => Err(StorageError::Conflict(key.to_string())),
                None => Ok(()),
            },
            WriteMode::IfVersion(expected) => match self.head_opt(key, location).await? {
                Some(meta) => {
                    if &token_of(meta.e_tag, meta.version) == expected {
                        Ok(())
                    } else {
                        Err(StorageError::Conflict(format!(
                            "{} changed since version {}",
                            key, expected
                        )))
                    }
                }
                None => Err(StorageError::Conflict(format!(
                    "{} does not exist, expected version {}",
                    key, expected
                ))),
            },
        }
    }

    /// Unexpired leases under `lease_dir`.
    async fn live_leases(&self, key: &str, lease_dir: &Path) -> Result<Vec<Ulid>, StorageError> {
        let leases: Vec<ObjectMeta> = self
            .store
            .list(Some(lease_dir))
            .try_collect()
            .await
            .map_err(|e| map_error(key, e))?;

        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let cutoff = now_ms.saturating_sub(self.lease_ttl.as_millis() as u64);
        Ok(leases
            .iter()
            .filter_map(|meta| meta.location.filename()?.parse::<Ulid>().ok())
            .filter(|ulid| ulid.timestamp_ms() >= cutoff)
            .collect())
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn name(&self) -> &'static str {
        "object_store"
    }

    async fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        opts: WriteOptions,
    ) -> Result<VersionToken, StorageError> {
        let location = location_for(key)?;
        let content_type = opts.content_type.unwrap_or_else(|| content_type_for(key));
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.into());
        let size = payload.len();
        let payload = PutPayload::from(payload);

        let result = match (self.conditional_put, &opts.mode) {
            (ConditionalPut::Lease, WriteMode::CreateOnly | WriteMode::IfVersion(_)) => {
                self.put_leased(key, &location, payload, &opts.mode, attributes)
                    .await?
            }
            _ => {
                self.put_native(key, &location, payload, &opts.mode, attributes)
                    .await?
            }
        };

        let token = token_of(result.e_tag, result.version);
        debug!(key = %key, bytes = size, version = %token, "Stored object");
        Ok(token)
    }

    async fn get(&self, key: &str) -> Result<StorageObject, StorageError> {
        let location = location_for(key)?;
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| map_error(key, e))?;
        read_result(key, result).await
    }

    async fn get_version(
        &self,
        key: &str,
        version: &VersionToken,
    ) -> Result<StorageObject, StorageError> {
        let location = location_for(key)?;
        let wanted = parse_token(version);
        let options = match wanted.version {
            Some(v) => GetOptions {
                version: Some(v),
                ..Default::default()
            },
            // unversioned bucket: only the current payload is reachable
            None => GetOptions {
                if_match: wanted.e_tag,
                ..Default::default()
            },
        };

        match self.store.get_opts(&location, options).await {
            Ok(result) => read_result(key, result).await,
            Err(object_store::Error::Precondition { .. }) => {
                Err(StorageError::NotFound(format!("{}@{}", key, version)))
            }
            Err(e) => Err(map_error(key, e)),
        }
    }

    async fn list_after(
        &self,
        prefix: &str,
        after: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        validate_prefix(prefix)?;
        let dir = prefix_dir(prefix).trim_end_matches('/');
        let dir_path = if dir.is_empty() {
            None
        } else {
            Some(Path::parse(dir).map_err(|e| StorageError::Key(format!("{}: {}", prefix, e)))?)
        };
        let offset = after.and_then(|a| Path::parse(a).ok());

        let stream = match &offset {
            Some(offset) => self.store.list_with_offset(dir_path.as_ref(), offset),
            None => self.store.list(dir_path.as_ref()),
        };
        let metas: Vec<ObjectMeta> = stream
            .try_collect()
            .await
            .map_err(|e| map_error(prefix, e))?;

        let mut keys: Vec<String> = metas
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|key| !key.split('/').any(|segment| segment.starts_with('.')))
            .filter(|key| key.starts_with(prefix))
            .filter(|key| after.map_or(true, |a| key.as_str() > a))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let location = location_for(key)?;
        // stores treat deleting an absent key as success
        if self.head_opt(key, &location).await?.is_none() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        self.store
            .delete(&location)
            .await
            .map_err(|e| map_error(key, e))?;
        debug!(key = %key, "Deleted object");
        Ok(())
    }
}

fn location_for(key: &str) -> Result<Path, StorageError> {
    validate_key(key)?;
    Path::parse(key).map_err(|e| StorageError::Key(format!("{}: {}", key, e)))
}

fn lease_dir(key: &str) -> Result<Path, StorageError> {
    Path::parse(format!("{}/{}", LEASES_DIR, key))
        .map_err(|e| StorageError::Key(format!("{}: {}", key, e)))
}

fn token_of(e_tag: Option<String>, version: Option<String>) -> VersionToken {
    let e_tag = e_tag.unwrap_or_default();
    match version {
        Some(version) => VersionToken(format!("{}{}{}", e_tag, TOKEN_SEPARATOR, version)),
        None => VersionToken(e_tag),
    }
}

fn parse_token(token: &VersionToken) -> UpdateVersion {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    match token.as_str().split_once(TOKEN_SEPARATOR) {
        Some((e_tag, version)) => UpdateVersion {
            e_tag: non_empty(e_tag),
            version: non_empty(version),
        },
        None => UpdateVersion {
            e_tag: non_empty(token.as_str()),
            version: None,
        },
    }
}

async fn read_result(
    key: &str,
    result: object_store::GetResult,
) -> Result<StorageObject, StorageError> {
    let content_type = result
        .attributes
        .get(&Attribute::ContentType)
        .map(|value| AsRef::<str>::as_ref(value).to_string())
        .unwrap_or_else(|| content_type_for(key));
    let version = token_of(result.meta.e_tag.clone(), result.meta.version.clone());
    let payload = result.bytes().await.map_err(|e| map_error(key, e))?;

    Ok(StorageObject {
        key: key.to_string(),
        payload: payload.to_vec(),
        content_type,
        version: Some(version),
    })
}

fn map_error(key: &str, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
        object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. } => {
            StorageError::Conflict(key.to_string())
        }
        other => StorageError::BackendUnavailable(format!("{}: {}", key, other)),
    }
}
