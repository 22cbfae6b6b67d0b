//! # hub-types
//!
//! Shared domain types for the Agent Hub.
//!
//! This crate defines the records every Hub store persists:
//! - Sessions: append-only logs of one agent invocation
//! - Metric events and the aggregate reports exported from them
//! - Prompt versions: numbered snapshots of named prompt templates
//! - Registry entries: directory records of known agents
//! - Settings: backend selection, timeouts and retry bounds
//!
//! ## Usage
//!
//! ```rust
//! use hub_types::{SessionEvent, SessionStatus};
//!
//! let event = SessionEvent::new("write_post", "topic=rust", "saved", 120, true);
//! assert!(event.success);
//! assert_ne!(SessionStatus::Completed, SessionStatus::Failed);
//! ```

pub mod config;
pub mod error;
pub mod metric;
pub mod prompt;
pub mod registry;
pub mod session;
pub mod summary;

pub use config::{
    ConditionalPut, LocalSettings, ObjectStoreSettings, RetrySettings, Settings,
    TimeoutSettings,
};
pub use error::HubError;
pub use metric::{Aggregate, MetricEvent, MetricKind, MetricsReport, TimeRange};
pub use prompt::PromptVersion;
pub use registry::{ModelProvider, RegistryEntry};
pub use session::{Session, SessionEvent, SessionRecord, SessionStatus};
pub use summary::{looks_like_error, summarize_input, truncate_text};
