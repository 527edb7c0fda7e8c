//! Persistence of finished sessions.
//!
//! The sequencer hands one `SessionRecord` to the store when it terminates. A failed or
//! slow write is logged by the caller and never blocks teardown.

use crate::error::{SessionError, SessionResult};
use crate::ledger::TurnRecord;
use crate::session::{RoundContext, Session, TerminationReason};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

const SESSIONS_TREE: &str = "sessions";

/// The completed-session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    /// Always "completed" when written by the sequencer.
    pub status: String,
    pub end_time: DateTime<Utc>,
    /// Filled in later by the report service; the live session never scores.
    pub overall_score: Option<f32>,
    pub termination_reason: TerminationReason,
    pub turn_index: u32,
    pub asked_questions: Vec<String>,
    pub context: RoundContext,
    pub ledger: Vec<TurnRecord>,
}

impl SessionRecord {
    pub fn completed(session: &Session, reason: TerminationReason, ledger: Vec<TurnRecord>) -> Self {
        Self {
            session_id: session.session_id.clone(),
            status: "completed".to_string(),
            end_time: Utc::now(),
            overall_score: None,
            termination_reason: reason,
            turn_index: session.turn_index,
            asked_questions: session.asked_questions.clone(),
            context: session.context.clone(),
            ledger,
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn persist(&self, record: &SessionRecord) -> SessionResult<()>;
}

/// Keeps records in memory. For tests and headless runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SessionRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn persist(&self, record: &SessionRecord) -> SessionResult<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| SessionError::Store(e.to_string()))?;
        records.push(record.clone());
        Ok(())
    }
}

/// Sled-backed store: one JSON value per session under the `sessions` tree.
pub struct SledSessionStore {
    db: sled::Db,
}

impl SledSessionStore {
    /// Opens (or creates) the database at `path`, e.g. `./data/mockmate_sessions`.
    pub fn open_path<P: AsRef<Path>>(path: P) -> SessionResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    pub fn load(&self, session_id: &str) -> SessionResult<Option<SessionRecord>> {
        let tree = self.db.open_tree(SESSIONS_TREE)?;
        match tree.get(session_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> SessionResult<usize> {
        Ok(self.db.open_tree(SESSIONS_TREE)?.len())
    }
}

#[async_trait]
impl SessionStore for SledSessionStore {
    async fn persist(&self, record: &SessionRecord) -> SessionResult<()> {
        let value = serde_json::to_vec(record)?;
        let tree = self.db.open_tree(SESSIONS_TREE)?;
        tree.insert(record.session_id.as_bytes(), value)?;
        tree.flush_async().await?;
        info!("Store: session {} persisted", record.session_id);
        Ok(())
    }
}

/// Writes `<dir>/<session_id>.json`, pretty-printed. Handy for inspecting runs by hand.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", session_id))
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn persist(&self, record: &SessionRecord) -> SessionResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&record.session_id);
        let body = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&path, body).await?;
        debug!("Store: wrote {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TurnRecord;
    use crate::session::CompletionTrigger;

    fn record(id: &str) -> SessionRecord {
        let mut session = Session::new(id, RoundContext::new("QA Engineer", "junior", "hr"), 6);
        session.pose_question("Why testing?");
        session.turn_index = 1;
        let ledger = vec![TurnRecord::new(
            "Why testing?",
            "I like breaking things",
            None,
            CompletionTrigger::Submit,
            false,
        )];
        SessionRecord::completed(&session, TerminationReason::InterviewComplete, ledger)
    }

    #[tokio::test]
    async fn sled_store_round_trips_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledSessionStore::open_path(dir.path().join("db")).unwrap();
        let rec = record("abc");
        store.persist(&rec).await.unwrap();

        let loaded = store.load("abc").unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.load("missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn json_file_store_writes_wire_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("sessions"));
        store.persist(&record("xyz")).await.unwrap();

        let raw = std::fs::read_to_string(store.path_for("xyz")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["sessionId"], "xyz");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["terminationReason"], "interview_complete");
        assert!(json["overallScore"].is_null());
        assert_eq!(json["ledger"][0]["answer"], "I like breaking things");
    }

    #[tokio::test]
    async fn memory_store_keeps_records() {
        let store = MemoryStore::new();
        store.persist(&record("m1")).await.unwrap();
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.records()[0].session_id, "m1");
    }
}
