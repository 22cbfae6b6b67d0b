//! # agent-hub
//!
//! Persistence and observability layer for LLM agents.
//!
//! The Hub gives every agent four stores over one pluggable backend:
//! - [`SessionStore`]: append-only log of each agent invocation
//! - [`MetricsCollector`]: fire-and-forget metric events, aggregate exports
//! - [`PromptVersionStore`]: numbered, immutable prompt versions
//! - [`AgentRegistry`]: directory of known agents, last write wins
//!
//! Every store persists only through `hub_storage::StorageBackend`, so the
//! local filesystem and object-store deployments behave the same.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use agent_hub::Hub;
//! use hub_types::{SessionEvent, SessionStatus, Settings};
//!
//! # async fn run() -> Result<(), hub_types::HubError> {
//! let settings = Settings::load(None)?;
//! let hub = Hub::open(&settings).await?;
//!
//! let session_id = hub.sessions().open().await?;
//! hub.sessions()
//!     .append(&session_id, SessionEvent::new("search", "q=rust", "3 hits", 42, true))
//!     .await?;
//! hub.sessions().close(&session_id, SessionStatus::Completed).await?;
//! # Ok(())
//! # }
//! ```

pub mod hub;
pub mod metrics;
pub mod prompts;
pub mod registry;
pub mod retry;
pub mod sessions;
pub mod telemetry;

pub use hub::Hub;
pub use metrics::{CollectorStats, MetricsCollector};
pub use prompts::PromptVersionStore;
pub use registry::AgentRegistry;
pub use retry::{retry_on_conflict, RetryPolicy};
pub use sessions::SessionStore;
