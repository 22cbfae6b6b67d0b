//! Error types for the Agent Hub.

use thiserror::Error;

/// Unified error type returned by every Hub operation.
///
/// `NotFound` is a normal outcome callers are expected to check for;
/// none of these variants is meant to take down the calling process.
#[derive(Debug, Error)]
pub enum HubError {
    /// Key, session, prompt version or registry entry is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// A conditional write lost its race and retries were exhausted
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Filesystem or network failure, including timeouts
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Stored payload failed to parse
    #[error("Corrupt payload: {0}")]
    Corrupt(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HubError {
    /// True for the absence outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, HubError::NotFound(_))
    }

    /// True when a conditional write lost.
    pub fn is_conflict(&self) -> bool {
        matches!(self, HubError::Conflict(_))
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Corrupt(err.to_string())
    }
}
