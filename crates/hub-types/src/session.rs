//! Session types.
//!
//! A session is the recorded lifecycle of one agent invocation (a chat turn
//! or a CLI command). It is persisted as an ordered series of records: one
//! `started` record, zero or more `event` records, and at most one `closed`
//! record. Each record is stored as its own object, so the session itself
//! is only ever assembled on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::summary::{looks_like_error, summarize_input, truncate_text};

/// Terminal status of a closed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Invocation finished normally
    Completed,
    /// Invocation ended with an error
    Failed,
    /// Nobody closed the session; swept after going idle
    Abandoned,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
            SessionStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// One tool invocation inside a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub tool_name: String,
    pub input_summary: String,
    pub output_summary: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
}

impl SessionEvent {
    /// Create an event stamped with the current time.
    pub fn new(
        tool_name: impl Into<String>,
        input_summary: impl Into<String>,
        output_summary: impl Into<String>,
        duration_ms: u64,
        success: bool,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            input_summary: input_summary.into(),
            output_summary: output_summary.into(),
            timestamp: Utc::now(),
            duration_ms,
            success,
        }
    }

    /// Build an event from a raw tool call.
    ///
    /// The input is summarized (long lists collapsed, long strings cut) and
    /// the output text truncated. A call counts as failed when `success` is
    /// false or the output text reports an error.
    pub fn tool_call(
        tool_name: impl Into<String>,
        input: &serde_json::Value,
        output: &str,
        duration_ms: u64,
        success: bool,
    ) -> Self {
        let success = success && !looks_like_error(output);
        Self::new(
            tool_name,
            summarize_input(input),
            truncate_text(output),
            duration_ms,
            success,
        )
    }

    /// Override the timestamp (events replayed from another source).
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// One persisted record of a session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum SessionRecord {
    Started {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt_version: Option<u32>,
        started_at: DateTime<Utc>,
    },
    Event(SessionEvent),
    Closed {
        status: SessionStatus,
        ended_at: DateTime<Utc>,
    },
}

impl SessionRecord {
    /// When this record was written.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SessionRecord::Started { started_at, .. } => *started_at,
            SessionRecord::Event(event) => event.timestamp,
            SessionRecord::Closed { ended_at, .. } => *ended_at,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionRecord::Closed { .. })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A session assembled from its records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub agent_id: Option<String>,
    pub prompt_version: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub events: Vec<SessionEvent>,
    /// None while the session is open
    pub ended_at: Option<DateTime<Utc>>,
    /// None while the session is open
    pub status: Option<SessionStatus>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.status.is_none()
    }

    /// Timestamp of the most recent record.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.ended_at
            .or_else(|| self.events.last().map(|e| e.timestamp))
            .unwrap_or(self.started_at)
    }

    /// Fold records in sequence order into a session.
    ///
    /// Returns `None` when the first record is not a `started` record.
    /// Anything after a `closed` record is ignored.
    pub fn from_records(records: impl IntoIterator<Item = SessionRecord>) -> Option<Self> {
        let mut records = records.into_iter();
        let mut session = match records.next()? {
            SessionRecord::Started {
                session_id,
                agent_id,
                prompt_version,
                started_at,
            } => Session {
                session_id,
                agent_id,
                prompt_version,
                started_at,
                events: Vec::new(),
                ended_at: None,
                status: None,
            },
            _ => return None,
        };

        for record in records {
            match record {
                SessionRecord::Event(event) => session.events.push(event),
                SessionRecord::Closed { status, ended_at } => {
                    session.status = Some(status);
                    session.ended_at = Some(ended_at);
                    break;
                }
                // a second start marker carries nothing new
                SessionRecord::Started { .. } => {}
            }
        }

        Some(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn started(id: &str) -> SessionRecord {
        SessionRecord::Started {
            session_id: id.to_string(),
            agent_id: Some("linkedin-content-agent".to_string()),
            prompt_version: None,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_tagging() {
        let record = SessionRecord::Event(SessionEvent::new("analyze_posts", "in", "out", 5, true));
        let value: serde_json::Value = serde_json::from_slice(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(value["record"], "event");
        assert_eq!(value["tool_name"], "analyze_posts");

        let closed = SessionRecord::Closed {
            status: SessionStatus::Abandoned,
            ended_at: Utc::now(),
        };
        let value: serde_json::Value = serde_json::from_slice(&closed.to_bytes().unwrap()).unwrap();
        assert_eq!(value["record"], "closed");
        assert_eq!(value["status"], "abandoned");
    }

    #[test]
    fn test_from_records_stops_at_close() {
        let records = vec![
            started("s1"),
            SessionRecord::Event(SessionEvent::new("a", "", "", 1, true)),
            SessionRecord::Closed {
                status: SessionStatus::Completed,
                ended_at: Utc::now(),
            },
            SessionRecord::Event(SessionEvent::new("late", "", "", 1, true)),
        ];

        let session = Session::from_records(records).unwrap();
        assert_eq!(session.events.len(), 1);
        assert_eq!(session.status, Some(SessionStatus::Completed));
        assert!(!session.is_open());
    }

    #[test]
    fn test_from_records_requires_start() {
        let records = vec![SessionRecord::Event(SessionEvent::new("a", "", "", 1, true))];
        assert!(Session::from_records(records).is_none());
        assert!(Session::from_records(Vec::new()).is_none());
    }

    #[test]
    fn test_tool_call_detects_error_output() {
        let event = SessionEvent::tool_call(
            "generate_video",
            &json!({"prompt": "sunrise"}),
            "Error: quota exceeded",
            900,
            true,
        );
        assert!(!event.success);
        assert!(event.input_summary.contains("sunrise"));
    }

    #[test]
    fn test_last_activity_prefers_latest_record() {
        let mut session = Session::from_records(vec![started("s2")]).unwrap();
        let start = session.started_at;
        assert_eq!(session.last_activity(), start);

        let later = start + chrono::Duration::seconds(10);
        session
            .events
            .push(SessionEvent::new("a", "", "", 1, true).at(later));
        assert_eq!(session.last_activity(), later);
    }
}
