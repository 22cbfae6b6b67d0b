//! Key encoding and decoding for the storage layer.
//!
//! Key layout (identical on every backend):
//! - `sessions/{session_id}/{seq:010}.json`
//! - `metrics/events/{timestamp_ms:013}-{ulid}.json`
//! - `metrics/reports/{start_ms:013}-{end_ms:013}-{ulid}.json`
//! - `prompts/{name}/{version:010}.json`
//! - `registry/{agent_name}.json`
//!
//! Numeric parts are zero-padded so lexicographic listing order is numeric
//! (and, for time-prefixed keys, chronological) order.

use ulid::Ulid;

use crate::error::StorageError;

pub const SESSIONS_PREFIX: &str = "sessions/";
pub const METRIC_EVENTS_PREFIX: &str = "metrics/events/";
pub const METRIC_REPORTS_PREFIX: &str = "metrics/reports/";
pub const PROMPTS_PREFIX: &str = "prompts/";
pub const REGISTRY_PREFIX: &str = "registry/";

const JSON_SUFFIX: &str = ".json";

/// Validate a single key segment (a session id, prompt name, agent name).
///
/// Segments are non-empty, use only `[A-Za-z0-9._-]` and never start with
/// `.`; hidden names are reserved for backend bookkeeping.
pub fn validate_segment(segment: &str) -> Result<(), StorageError> {
    if segment.is_empty() {
        return Err(StorageError::Key("empty key segment".to_string()));
    }
    if segment.starts_with('.') {
        return Err(StorageError::Key(format!(
            "key segment may not start with '.': {}",
            segment
        )));
    }
    if let Some(bad) = segment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(StorageError::Key(format!(
            "invalid character {:?} in key segment: {}",
            bad, segment
        )));
    }
    Ok(())
}

/// Validate a full object key.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::Key("empty key".to_string()));
    }
    key.split('/').try_for_each(validate_segment)
}

/// Validate a listing prefix.
///
/// Every complete segment must be valid; the trailing partial segment may
/// be empty (prefix ends in `/`) but is otherwise held to the same rules.
pub fn validate_prefix(prefix: &str) -> Result<(), StorageError> {
    if prefix.is_empty() {
        return Ok(());
    }
    let (complete, partial) = match prefix.rsplit_once('/') {
        Some((complete, partial)) => (Some(complete), partial),
        None => (None, prefix),
    };
    if let Some(complete) = complete {
        complete.split('/').try_for_each(validate_segment)?;
    }
    if !partial.is_empty() {
        validate_segment(partial)?;
    }
    Ok(())
}

/// Directory part of a prefix: everything up to and including the last `/`.
pub fn prefix_dir(prefix: &str) -> &str {
    match prefix.rfind('/') {
        Some(idx) => &prefix[..=idx],
        None => "",
    }
}

fn strip<'a>(key: &'a str, prefix: &str) -> Result<&'a str, StorageError> {
    key.strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(JSON_SUFFIX))
        .ok_or_else(|| StorageError::Key(format!("Unexpected key format: {}", key)))
}

fn parse_number<T: std::str::FromStr>(key: &str, digits: &str) -> Result<T, StorageError>
where
    T::Err: std::fmt::Display,
{
    digits
        .parse()
        .map_err(|e| StorageError::Key(format!("Invalid number in {}: {}", key, e)))
}

/// Key of one session record.
/// Format: sessions/{session_id}/{seq:010}.json
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecordKey {
    pub session_id: String,
    pub seq: u64,
}

impl SessionRecordKey {
    pub fn new(session_id: impl Into<String>, seq: u64) -> Result<Self, StorageError> {
        let session_id = session_id.into();
        validate_segment(&session_id)?;
        Ok(Self { session_id, seq })
    }

    /// Prefix listing every record of one session.
    pub fn prefix(session_id: &str) -> Result<String, StorageError> {
        validate_segment(session_id)?;
        Ok(format!("{}{}/", SESSIONS_PREFIX, session_id))
    }

    pub fn to_key(&self) -> String {
        format!("{}{}/{:010}{}", SESSIONS_PREFIX, self.session_id, self.seq, JSON_SUFFIX)
    }

    pub fn from_key(key: &str) -> Result<Self, StorageError> {
        let rest = strip(key, SESSIONS_PREFIX)?;
        let (session_id, seq) = rest
            .split_once('/')
            .ok_or_else(|| StorageError::Key(format!("Invalid session key: {}", key)))?;
        Ok(Self {
            session_id: session_id.to_string(),
            seq: parse_number(key, seq)?,
        })
    }

    /// Session id named by any key under `sessions/`.
    pub fn session_id_of(key: &str) -> Option<&str> {
        key.strip_prefix(SESSIONS_PREFIX)?.split('/').next()
    }
}

/// Key of one metric event.
/// Format: metrics/events/{timestamp_ms:013}-{ulid}.json
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricEventKey {
    pub timestamp_ms: i64,
    pub ulid: Ulid,
}

impl MetricEventKey {
    /// Key for an event at `timestamp_ms` with a fresh ULID.
    pub fn new(timestamp_ms: i64) -> Result<Self, StorageError> {
        if timestamp_ms < 0 {
            return Err(StorageError::Key(format!(
                "metric timestamp before epoch: {}",
                timestamp_ms
            )));
        }
        Ok(Self {
            timestamp_ms,
            ulid: Ulid::new(),
        })
    }

    pub fn to_key(&self) -> String {
        format!(
            "{}{:013}-{}{}",
            METRIC_EVENTS_PREFIX, self.timestamp_ms, self.ulid, JSON_SUFFIX
        )
    }

    pub fn from_key(key: &str) -> Result<Self, StorageError> {
        let rest = strip(key, METRIC_EVENTS_PREFIX)?;
        let (ts, ulid) = rest
            .split_once('-')
            .ok_or_else(|| StorageError::Key(format!("Invalid metric key: {}", key)))?;
        let ulid: Ulid = ulid
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid ULID in {}: {}", key, e)))?;
        Ok(Self {
            timestamp_ms: parse_number(key, ts)?,
            ulid,
        })
    }

    /// Listing cursor: every event key at or after `start_ms` sorts above it.
    pub fn cursor_before(start_ms: i64) -> String {
        format!("{}{:013}", METRIC_EVENTS_PREFIX, start_ms.max(0))
    }
}

/// Key of an exported report.
/// Format: metrics/reports/{start_ms:013}-{end_ms:013}-{ulid}.json
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportKey {
    pub start_ms: i64,
    pub end_ms: i64,
    pub ulid: Ulid,
}

impl ReportKey {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self {
            start_ms: start_ms.max(0),
            end_ms: end_ms.max(0),
            ulid: Ulid::new(),
        }
    }

    pub fn to_key(&self) -> String {
        format!(
            "{}{:013}-{:013}-{}{}",
            METRIC_REPORTS_PREFIX, self.start_ms, self.end_ms, self.ulid, JSON_SUFFIX
        )
    }
}

/// Key of one prompt version.
/// Format: prompts/{name}/{version:010}.json
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptKey {
    pub name: String,
    pub version: u32,
}

impl PromptKey {
    pub fn new(name: impl Into<String>, version: u32) -> Result<Self, StorageError> {
        let name = name.into();
        validate_segment(&name)?;
        Ok(Self { name, version })
    }

    pub fn prefix(name: &str) -> Result<String, StorageError> {
        validate_segment(name)?;
        Ok(format!("{}{}/", PROMPTS_PREFIX, name))
    }

    pub fn to_key(&self) -> String {
        format!("{}{}/{:010}{}", PROMPTS_PREFIX, self.name, self.version, JSON_SUFFIX)
    }

    pub fn from_key(key: &str) -> Result<Self, StorageError> {
        let rest = strip(key, PROMPTS_PREFIX)?;
        let (name, version) = rest
            .split_once('/')
            .ok_or_else(|| StorageError::Key(format!("Invalid prompt key: {}", key)))?;
        Ok(Self {
            name: name.to_string(),
            version: parse_number(key, version)?,
        })
    }
}

/// Key of one registry entry.
/// Format: registry/{agent_name}.json
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryKey {
    pub name: String,
}

impl RegistryKey {
    pub fn new(name: impl Into<String>) -> Result<Self, StorageError> {
        let name = name.into();
        validate_segment(&name)?;
        Ok(Self { name })
    }

    pub fn to_key(&self) -> String {
        format!("{}{}{}", REGISTRY_PREFIX, self.name, JSON_SUFFIX)
    }

    pub fn from_key(key: &str) -> Result<Self, StorageError> {
        let name = strip(key, REGISTRY_PREFIX)?;
        Ok(Self {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_validation() {
        assert!(validate_segment("linkedin-content-agent").is_ok());
        assert!(validate_segment("v1.2_final").is_ok());
        assert!(validate_segment("").is_err());
        assert!(validate_segment(".versions").is_err());
        assert!(validate_segment("..").is_err());
        assert!(validate_segment("a b").is_err());
        assert!(validate_segment("a/b").is_err());
    }

    #[test]
    fn test_key_and_prefix_validation() {
        assert!(validate_key("prompts/greeting/0000000001.json").is_ok());
        assert!(validate_key("/prompts/x.json").is_err());
        assert!(validate_key("prompts//x.json").is_err());
        assert!(validate_key("prompts/../etc").is_err());

        assert!(validate_prefix("").is_ok());
        assert!(validate_prefix("sessions/").is_ok());
        assert!(validate_prefix("metrics/events/00000").is_ok());
        assert!(validate_prefix("../").is_err());
    }

    #[test]
    fn test_prefix_dir() {
        assert_eq!(prefix_dir("metrics/events/000123"), "metrics/events/");
        assert_eq!(prefix_dir("sessions/"), "sessions/");
        assert_eq!(prefix_dir("reg"), "");
    }

    #[test]
    fn test_session_key_layout() {
        let key = SessionRecordKey::new("01HN4QXKN6YWXVKZ3JMHP4BCDE", 3).unwrap();
        assert_eq!(
            key.to_key(),
            "sessions/01HN4QXKN6YWXVKZ3JMHP4BCDE/0000000003.json"
        );
        assert_eq!(SessionRecordKey::from_key(&key.to_key()).unwrap(), key);
        assert_eq!(
            SessionRecordKey::session_id_of(&key.to_key()),
            Some("01HN4QXKN6YWXVKZ3JMHP4BCDE")
        );
    }

    #[test]
    fn test_session_seq_lexicographic_order() {
        let k9 = SessionRecordKey::new("s", 9).unwrap().to_key();
        let k10 = SessionRecordKey::new("s", 10).unwrap().to_key();
        assert!(k9 < k10);
    }

    #[test]
    fn test_metric_key_cursor_bounds() {
        let at = MetricEventKey::new(1_000).unwrap().to_key();
        let before = MetricEventKey::new(999).unwrap().to_key();
        let cursor = MetricEventKey::cursor_before(1_000);
        assert!(at > cursor);
        assert!(before < cursor);
        assert_eq!(MetricEventKey::from_key(&at).unwrap().timestamp_ms, 1_000);
    }

    #[test]
    fn test_metric_key_rejects_negative_timestamp() {
        assert!(MetricEventKey::new(-1).is_err());
    }

    #[test]
    fn test_prompt_key_layout() {
        let key = PromptKey::new("greeting", 12).unwrap();
        assert_eq!(key.to_key(), "prompts/greeting/0000000012.json");
        assert_eq!(PromptKey::from_key(&key.to_key()).unwrap(), key);
        assert!(PromptKey::new("../greeting", 1).is_err());
    }

    #[test]
    fn test_registry_key_layout() {
        let key = RegistryKey::new("linkedin-content-agent").unwrap();
        assert_eq!(key.to_key(), "registry/linkedin-content-agent.json");
        assert_eq!(RegistryKey::from_key(&key.to_key()).unwrap(), key);
    }

    #[test]
    fn test_report_keys_are_unique_per_export() {
        let a = ReportKey::new(0, 1_000).to_key();
        let b = ReportKey::new(0, 1_000).to_key();
        assert_ne!(a, b);
        assert!(a.starts_with("metrics/reports/0000000000000-0000000001000-"));
    }
}
