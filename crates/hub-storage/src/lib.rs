//! Storage layer for the Agent Hub.
//!
//! Provides one key/value + prefix-listing contract with interchangeable
//! backends:
//! - `LocalBackend`: files under a root directory, atomic publish via
//!   hard link (create-only) or rename (overwrite)
//! - `ObjectStoreBackend`: S3-compatible object storage, native or
//!   lease-emulated conditional writes
//! - `MemoryBackend`: in-process fake with fault injection for tests
//! - `TimeoutBackend`: bounds every call of a wrapped backend
//!
//! Stores depend only on `Arc<dyn StorageBackend>`; `open_backend` resolves
//! the configured kind once at startup.

pub mod backend;
pub mod error;
pub mod factory;
pub mod keys;
pub mod local;
pub mod memory;
pub mod object;
pub mod timeout;

pub use backend::{StorageBackend, StorageObject, VersionToken, WriteMode, WriteOptions};
pub use error::StorageError;
pub use factory::open_backend;
pub use keys::{MetricEventKey, PromptKey, RegistryKey, ReportKey, SessionRecordKey};
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use object::ObjectStoreBackend;
pub use timeout::TimeoutBackend;
