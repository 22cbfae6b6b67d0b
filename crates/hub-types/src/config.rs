//! Configuration loading for the Agent Hub.
//!
//! Layered config: defaults -> config file -> explicit file -> env vars.
//! The default config file lives at `<config dir>/agent-hub/config.toml`;
//! environment variables use the `AGENT_HUB__` prefix with `__` between
//! nested keys (e.g. `AGENT_HUB__OBJECT_STORE__BUCKET`).
//!
//! The backend kind is a single boolean, `use_object_store`. When it is
//! absent the local filesystem backend is used.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::HubError;

/// Local filesystem backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSettings {
    /// Root directory every key is resolved under
    #[serde(default = "default_local_root")]
    pub root: String,

    /// Keep overwritten payloads under `.versions/` so prior versions
    /// stay readable.
    #[serde(default = "default_true")]
    pub retain_versions: bool,
}

fn default_local_root() -> String {
    ProjectDirs::from("", "", "agent-hub")
        .map(|p| p.data_local_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from("./agent-hub"))
        .to_string_lossy()
        .to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            root: default_local_root(),
            retain_versions: true,
        }
    }
}

impl LocalSettings {
    /// Expand a leading `~/` in the root path.
    pub fn expanded_root(&self) -> PathBuf {
        if let Some(rest) = self.root.strip_prefix("~/") {
            if let Some(home) = directories::BaseDirs::new() {
                return home.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.root)
    }
}

/// How the object-store backend enforces conditional writes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionalPut {
    /// Use the store's native `If-None-Match` / `If-Match` support
    #[default]
    Native,
    /// Emulate with lease objects (for stores without conditional put)
    Lease,
}

/// Object-store backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreSettings {
    /// Bucket name (required when `use_object_store` is set)
    #[serde(default)]
    pub bucket: Option<String>,

    /// Region, falls back to the SDK environment when unset
    #[serde(default)]
    pub region: Option<String>,

    /// Optional key prefix every Hub key is placed under
    #[serde(default)]
    pub prefix: Option<String>,

    /// Custom endpoint for S3-compatible stores
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Allow plain HTTP endpoints (local S3-compatible servers)
    #[serde(default)]
    pub allow_http: bool,

    /// Conditional write strategy
    #[serde(default)]
    pub conditional_put: ConditionalPut,

    /// Leases older than this are ignored by the lease emulation
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_ms: u64,
}

fn default_lease_ttl() -> u64 {
    30_000
}

impl Default for ObjectStoreSettings {
    fn default() -> Self {
        Self {
            bucket: None,
            region: None,
            prefix: None,
            endpoint: None,
            allow_http: false,
            conditional_put: ConditionalPut::default(),
            lease_ttl_ms: default_lease_ttl(),
        }
    }
}

impl ObjectStoreSettings {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }
}

/// Bounds on backend calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Upper bound on any single backend call
    #[serde(default = "default_request_timeout")]
    pub request_ms: u64,

    /// Upper bound on recording one metric event before it is dropped
    #[serde(default = "default_metrics_record_timeout")]
    pub metrics_record_ms: u64,
}

fn default_request_timeout() -> u64 {
    5_000
}

fn default_metrics_record_timeout() -> u64 {
    250
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            request_ms: default_request_timeout(),
            metrics_record_ms: default_metrics_record_timeout(),
        }
    }
}

impl TimeoutSettings {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn metrics_record(&self) -> Duration {
        Duration::from_millis(self.metrics_record_ms)
    }
}

/// Retry bounds for conditional-create loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts before a lost race is surfaced as `Conflict`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay after a conflict
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff delay ceiling
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    16
}

fn default_initial_backoff() -> u64 {
    10
}

fn default_max_backoff() -> u64 {
    250
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

/// Main Hub settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Select the object-store backend instead of the local filesystem
    #[serde(default)]
    pub use_object_store: bool,

    #[serde(default)]
    pub local: LocalSettings,

    #[serde(default)]
    pub object_store: ObjectStoreSettings,

    #[serde(default)]
    pub timeouts: TimeoutSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_object_store: false,
            local: LocalSettings::default(),
            object_store: ObjectStoreSettings::default(),
            timeouts: TimeoutSettings::default(),
            retry: RetrySettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (`<config dir>/agent-hub/config.toml`)
    /// 3. Caller-specified config file (optional)
    /// 4. Environment variables (`AGENT_HUB__*`)
    pub fn load(config_path: Option<&str>) -> Result<Self, HubError> {
        let config_dir = ProjectDirs::from("", "", "agent-hub")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("use_object_store", false)
            .map_err(|e| HubError::Config(e.to_string()))?
            .set_default("local.root", default_local_root())
            .map_err(|e| HubError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| HubError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("AGENT_HUB")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| HubError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| HubError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.use_object_store
            && self
                .object_store
                .bucket
                .as_deref()
                .map_or(true, |b| b.trim().is_empty())
        {
            return Err(HubError::Config(
                "object_store.bucket is required when use_object_store is set".to_string(),
            ));
        }
        if self.timeouts.request_ms == 0 || self.timeouts.metrics_record_ms == 0 {
            return Err(HubError::Config("timeouts must be > 0".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(HubError::Config("retry.max_attempts must be > 0".to_string()));
        }
        Ok(())
    }

    /// Settings for a local backend rooted at `root`, everything else default.
    pub fn local_at(root: impl Into<PathBuf>) -> Self {
        Self {
            local: LocalSettings {
                root: root.into().to_string_lossy().to_string(),
                retain_versions: true,
            },
            ..Self::default()
        }
    }
}
