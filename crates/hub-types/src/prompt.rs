//! Prompt version type.
//!
//! A prompt version is an immutable, numbered snapshot of a named prompt
//! template. Versions for one name start at 1 and form a gapless sequence;
//! the highest one is current.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptVersion {
    pub name: String,
    pub version: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PromptVersion {
    /// Create a version stamped with the current time.
    ///
    /// An empty note is stored as no note.
    pub fn new(name: impl Into<String>, version: u32, content: impl Into<String>, note: &str) -> Self {
        let note = note.trim();
        Self {
            name: name.into(),
            version,
            content: content.into(),
            created_at: Utc::now(),
            note: (!note.is_empty()).then(|| note.to_string()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
