//! Session log store.
//!
//! Each record of a session is its own object under
//! `sessions/<id>/<seq>.json`. Sequence 0 is the `started` record; appends
//! and the closing record claim the next sequence with a create-only write,
//! so concurrent writers never overwrite each other and nothing can land
//! after a `closed` record without first observing it.

use chrono::Utc;
use hub_storage::keys::SESSIONS_PREFIX;
use hub_storage::{SessionRecordKey, StorageBackend, WriteOptions};
use hub_types::{HubError, Session, SessionEvent, SessionRecord, SessionStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use ulid::Generator;

use crate::retry::{retry_on_conflict, RetryPolicy};

pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
    retry: RetryPolicy,
    /// Monotonic within this store, so ids sort in open order
    ids: Mutex<Generator>,
    /// Highest seq seen per open session; listing resumes after it
    cursors: Mutex<HashMap<String, u64>>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn StorageBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            ids: Mutex::new(Generator::new()),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Start an unattributed session.
    pub async fn open(&self) -> Result<String, HubError> {
        self.open_for(None, None).await
    }

    /// Start a session attributed to an agent and the prompt version it runs.
    pub async fn open_for(
        &self,
        agent_id: Option<&str>,
        prompt_version: Option<u32>,
    ) -> Result<String, HubError> {
        let session_id = self.next_id()?;
        let record = SessionRecord::Started {
            session_id: session_id.clone(),
            agent_id: agent_id.map(str::to_string),
            prompt_version,
            started_at: Utc::now(),
        };
        self.write_record(&session_id, 0, &record).await?;
        info!(session_id = %session_id, agent_id = ?agent_id, "Session opened");
        Ok(session_id)
    }

    /// Append an event after the current last record.
    ///
    /// `NotFound` when the session was never opened or is already closed.
    pub async fn append(&self, session_id: &str, event: SessionEvent) -> Result<(), HubError> {
        let record = SessionRecord::Event(event);
        let record = &record;
        let seq = retry_on_conflict(&self.retry, "session append", move || async move {
            let seq = match self.last_record(session_id).await? {
                None => return Err(HubError::NotFound(format!("session {}", session_id))),
                Some((_, last)) if last.is_closed() => {
                    return Err(HubError::NotFound(format!("session {} is closed", session_id)))
                }
                Some((seq, _)) => seq + 1,
            };
            self.write_record(session_id, seq, record).await?;
            Ok(seq)
        })
        .await?;

        debug!(session_id = %session_id, seq, "Appended session event");
        Ok(())
    }

    /// Write the terminal record. Closing a closed session is a no-op.
    pub async fn close(&self, session_id: &str, status: SessionStatus) -> Result<(), HubError> {
        let closed = retry_on_conflict(&self.retry, "session close", move || async move {
            let seq = match self.last_record(session_id).await? {
                None => return Err(HubError::NotFound(format!("session {}", session_id))),
                Some((_, last)) if last.is_closed() => return Ok(false),
                Some((seq, _)) => seq + 1,
            };
            let record = SessionRecord::Closed {
                status,
                ended_at: Utc::now(),
            };
            self.write_record(session_id, seq, &record).await?;
            Ok(true)
        })
        .await?;

        if closed {
            info!(session_id = %session_id, status = %status, "Session closed");
        } else {
            debug!(session_id = %session_id, "Session already closed");
        }
        Ok(())
    }

    /// Events of a session in append order.
    pub async fn read(&self, session_id: &str) -> Result<Vec<SessionEvent>, HubError> {
        Ok(self.load(session_id).await?.events)
    }

    /// The whole session: metadata, events and terminal status.
    pub async fn load(&self, session_id: &str) -> Result<Session, HubError> {
        let prefix = SessionRecordKey::prefix(session_id)?;
        let keys = self.backend.list(&prefix).await?;
        if keys.is_empty() {
            return Err(HubError::NotFound(format!("session {}", session_id)));
        }

        let mut records = Vec::with_capacity(keys.len());
        for key in &keys {
            let record = self.read_record(key).await?;
            let closed = record.is_closed();
            records.push(record);
            if closed {
                break;
            }
        }

        Session::from_records(records).ok_or_else(|| {
            HubError::Corrupt(format!("session {} has no started record", session_id))
        })
    }

    /// Every session id, oldest first.
    pub async fn list(&self) -> Result<Vec<String>, HubError> {
        let keys = self.backend.list(SESSIONS_PREFIX).await?;
        let mut ids: Vec<String> = keys
            .iter()
            .filter_map(|key| SessionRecordKey::session_id_of(key))
            .map(str::to_string)
            .collect();
        // keys are sorted, so one session's records are adjacent
        ids.dedup();
        Ok(ids)
    }

    /// Close open sessions idle for longer than `idle_for` as abandoned.
    ///
    /// Returns the ids that were closed. Sessions whose records do not
    /// parse are skipped.
    pub async fn abandon_stale(&self, idle_for: Duration) -> Result<Vec<String>, HubError> {
        let idle_for = chrono::Duration::from_std(idle_for)
            .map_err(|e| HubError::InvalidInput(format!("idle duration: {}", e)))?;
        let cutoff = Utc::now() - idle_for;

        let mut abandoned = Vec::new();
        for session_id in self.list().await? {
            let session = match self.load(&session_id).await {
                Ok(session) => session,
                Err(HubError::Corrupt(msg)) => {
                    warn!(session_id = %session_id, error = %msg, "Skipping unreadable session");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if session.is_open() && session.last_activity() < cutoff {
                self.close(&session_id, SessionStatus::Abandoned).await?;
                abandoned.push(session_id);
            }
        }

        if !abandoned.is_empty() {
            info!(count = abandoned.len(), "Abandoned stale sessions");
        }
        Ok(abandoned)
    }

    fn next_id(&self) -> Result<String, HubError> {
        let mut ids = self
            .ids
            .lock()
            .map_err(|_| HubError::BackendUnavailable("session id generator poisoned".to_string()))?;
        let id = ids
            .generate()
            .map_err(|e| HubError::Conflict(format!("session id: {}", e)))?;
        Ok(id.to_string())
    }

    async fn last_record(&self, session_id: &str) -> Result<Option<(u64, SessionRecord)>, HubError> {
        let prefix = SessionRecordKey::prefix(session_id)?;
        let known = match self.cursor(session_id) {
            Some(seq) => Some(SessionRecordKey::new(session_id, seq)?.to_key()),
            None => None,
        };
        let keys = self.backend.list_after(&prefix, known.as_deref()).await?;
        let Some(last) = keys.last().or(known.as_ref()) else {
            return Ok(None);
        };
        let seq = SessionRecordKey::from_key(last)?.seq;
        let record = self.read_record(last).await?;
        if record.is_closed() {
            self.forget(session_id);
        } else {
            self.advance(session_id, seq);
        }
        Ok(Some((seq, record)))
    }

    fn cursor(&self, session_id: &str) -> Option<u64> {
        // a poisoned map only costs a full listing
        self.cursors.lock().ok()?.get(session_id).copied()
    }

    fn advance(&self, session_id: &str, seq: u64) {
        if let Ok(mut cursors) = self.cursors.lock() {
            let entry = cursors.entry(session_id.to_string()).or_insert(seq);
            *entry = (*entry).max(seq);
        }
    }

    fn forget(&self, session_id: &str) {
        if let Ok(mut cursors) = self.cursors.lock() {
            cursors.remove(session_id);
        }
    }

    async fn read_record(&self, key: &str) -> Result<SessionRecord, HubError> {
        let object = self.backend.get(key).await?;
        SessionRecord::from_bytes(&object.payload)
            .map_err(|e| HubError::Corrupt(format!("{}: {}", key, e)))
    }

    async fn write_record(
        &self,
        session_id: &str,
        seq: u64,
        record: &SessionRecord,
    ) -> Result<(), HubError> {
        let key = SessionRecordKey::new(session_id, seq)?.to_key();
        self.backend
            .put(&key, record.to_bytes()?, WriteOptions::create_only())
            .await?;
        if record.is_closed() {
            self.forget(session_id);
        } else {
            self.advance(session_id, seq);
        }
        Ok(())
    }
}
