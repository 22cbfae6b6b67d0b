//! Agent registry entry type.
//!
//! The registry is a liveness and discovery directory keyed by agent name.
//! Entries are upserted; the last registration wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Model provider backing an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    Anthropic,
    Gemini,
    Openai,
    /// Any other provider, by name
    Other(String),
}

impl std::fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelProvider::Anthropic => write!(f, "anthropic"),
            ModelProvider::Gemini => write!(f, "gemini"),
            ModelProvider::Openai => write!(f, "openai"),
            ModelProvider::Other(name) => write!(f, "{}", name),
        }
    }
}

impl std::str::FromStr for ModelProvider {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "anthropic" | "claude" => ModelProvider::Anthropic,
            "gemini" | "google" => ModelProvider::Gemini,
            "openai" => ModelProvider::Openai,
            _ => ModelProvider::Other(s.to_string()),
        })
    }
}

/// A registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Unique key; must be a valid key segment
    pub name: String,
    pub provider: ModelProvider,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub owner: String,
    pub last_seen: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
}

impl RegistryEntry {
    pub fn new(name: impl Into<String>, provider: ModelProvider, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider,
            capabilities: BTreeSet::new(),
            owner: owner.into(),
            last_seen: Utc::now(),
            display_name: None,
            description: None,
            model_id: None,
            environment: None,
            repo_url: None,
            tags: BTreeSet::new(),
            run_count: 0,
            failure_count: 0,
            last_run_id: None,
            last_run_at: None,
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Count one run and remember its id.
    pub fn record_run(&mut self, run_id: impl Into<String>, success: bool) {
        let now = Utc::now();
        self.run_count = self.run_count.saturating_add(1);
        if !success {
            self.failure_count = self.failure_count.saturating_add(1);
        }
        self.last_run_id = Some(run_id.into());
        self.last_run_at = Some(now);
        self.last_seen = now;
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
