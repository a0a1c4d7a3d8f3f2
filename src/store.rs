//! Session Persistence
//!
//! Sessions live in a key/value substrate under two fixed keys: `sessions`
//! holds a JSON object mapping session id to session record, `currentSession`
//! holds the id of the active session. [`SessionStore`] is constructed once
//! and injected into the engine; the current-session pointer is owned here
//! rather than living in ambient global state.
//!
//! Reads never raise: a missing key, an unreadable backend, or a structurally
//! invalid record all degrade to "no session found" with a logged warning.
//! Writes surface [`StoreError`] so callers can decide what to do with a
//! failure (the engine deliberately discards it, see `engine.rs`).

use crate::models::{Session, SessionSummary};
use chrono::Utc;
use rand::{Rng, distr::Alphanumeric};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Key under which the id → session mapping is stored.
pub const SESSIONS_KEY: &str = "sessions";
/// Key under which the current-session pointer is stored.
pub const CURRENT_SESSION_KEY: &str = "currentSession";

/// Export format version stamped into exported sessions.
pub const EXPORT_VERSION: &str = "1.0";

/// Errors surfaced by the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid session payload: {0}")]
    InvalidSession(String),
}

/// Minimal key/value persistence substrate.
///
/// Implementations are assumed to have a single writer; concurrent writers
/// from two contexts race and the last write wins.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store backed by a shared map. Clones share the same data, which
/// makes it convenient for tests and short-lived tools.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    data: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let data = self
            .data
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        data.remove(key);
        Ok(())
    }
}

/// File-backed store keeping one JSON document per key under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(self.key_path(key)) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.key_path(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Generates a process-unique session identifier: a millisecond timestamp
/// combined with a random alphanumeric suffix.
pub fn generate_session_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!(
        "session_{}_{}",
        Utc::now().timestamp_millis(),
        suffix.to_lowercase()
    )
}

/// Durable storage for conversation sessions plus the current-session pointer.
pub struct SessionStore {
    kv: Box<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(kv: Box<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Reads the raw session mapping, degrading to an empty map on any
    /// backend or decode failure. Insertion order of the JSON object is
    /// preserved, which keeps `list()` tie-breaks stable.
    fn read_sessions(&self) -> Map<String, Value> {
        let raw = match self.kv.get(SESSIONS_KEY) {
            Ok(Some(text)) => text,
            Ok(None) => return Map::new(),
            Err(err) => {
                warn!(error = %err, "failed to read session mapping");
                return Map::new();
            }
        };
        match serde_json::from_str::<Map<String, Value>>(&raw) {
            Ok(map) => map,
            Err(err) => {
                warn!(error = %err, "session mapping is not a valid JSON object");
                Map::new()
            }
        }
    }

    fn write_sessions(&self, sessions: &Map<String, Value>) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(sessions)?;
        self.kv.set(SESSIONS_KEY, &serialized)
    }

    /// Upserts a session and points `currentSession` at it.
    ///
    /// An empty id gets a freshly generated one. `created_at` is preserved
    /// from the passed session or from the stored copy; `updated_at` is
    /// always refreshed. Returns the session id.
    pub fn save(&self, mut session: Session) -> Result<String, StoreError> {
        let mut sessions = self.read_sessions();

        if session.id.is_empty() {
            session.id = generate_session_id();
        }
        let id = session.id.clone();

        let now = Utc::now();
        if session.created_at.is_none() {
            session.created_at = sessions
                .get(&id)
                .and_then(|existing| existing.get("createdAt"))
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .or(Some(now));
        }
        session.updated_at = Some(now);

        sessions.insert(id.clone(), serde_json::to_value(&session)?);
        self.write_sessions(&sessions)?;
        self.kv.set(CURRENT_SESSION_KEY, &id)?;

        debug!(session_id = %id, "session saved");
        Ok(id)
    }

    /// Fetches a single session. Missing or structurally invalid records
    /// yield `None`.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let sessions = self.read_sessions();
        let value = sessions.get(session_id)?;
        match serde_json::from_value(value.clone()) {
            Ok(session) => Some(session),
            Err(err) => {
                warn!(%session_id, error = %err, "stored session has an unexpected shape");
                None
            }
        }
    }

    /// All decodable sessions in their stored (insertion) order.
    pub fn get_all(&self) -> Vec<Session> {
        self.read_sessions()
            .values()
            .filter_map(|value| serde_json::from_value(value.clone()).ok())
            .collect()
    }

    /// The session the current-session pointer refers to, if any.
    pub fn get_current(&self) -> Option<Session> {
        let id = self.current_session_id()?;
        self.get(&id)
    }

    /// The raw current-session pointer.
    pub fn current_session_id(&self) -> Option<String> {
        match self.kv.get(CURRENT_SESSION_KEY) {
            Ok(id) => id.filter(|id| !id.is_empty()),
            Err(err) => {
                warn!(error = %err, "failed to read current session pointer");
                None
            }
        }
    }

    /// Points `currentSession` at the given id.
    pub fn set_current(&self, session_id: &str) -> Result<(), StoreError> {
        self.kv.set(CURRENT_SESSION_KEY, session_id)
    }

    /// Removes a session. Clears the current-session pointer when it referred
    /// to the deleted id. Returns whether the removal was persisted.
    pub fn delete(&self, session_id: &str) -> bool {
        let mut sessions = self.read_sessions();
        sessions.shift_remove(session_id);

        if let Err(err) = self.write_sessions(&sessions) {
            warn!(%session_id, error = %err, "failed to persist session removal");
            return false;
        }

        if self.current_session_id().as_deref() == Some(session_id) {
            if let Err(err) = self.kv.remove(CURRENT_SESSION_KEY) {
                warn!(error = %err, "failed to clear current session pointer");
            }
        }
        true
    }

    /// Clears the current-session pointer and hands out a fresh id. No entry
    /// is stored until the first `save` with that id.
    pub fn create_new(&self) -> Result<String, StoreError> {
        self.kv.remove(CURRENT_SESSION_KEY)?;
        Ok(generate_session_id())
    }

    /// Summaries of all sessions, most recently updated first. Ties keep the
    /// stored mapping order (the sort is stable).
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .get_all()
            .into_iter()
            .map(|session| {
                let path = session.learning_path.unwrap_or_default();
                SessionSummary {
                    id: session.id,
                    topic: path
                        .topic
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| "Unknown Topic".to_string()),
                    subtopic: path.subtopic.unwrap_or_default(),
                    level: path.level.unwrap_or_default(),
                    created_at: session.created_at,
                    updated_at: session.updated_at,
                    has_questions: session.qa_data.is_some(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// Serializes a session for export, stamped with `exportedAt` and the
    /// format version. Returns `None` when the session does not exist.
    pub fn export_session(&self, session_id: &str) -> Option<String> {
        let session = self.get(session_id)?;
        let mut value = match serde_json::to_value(&session) {
            Ok(value) => value,
            Err(err) => {
                warn!(%session_id, error = %err, "failed to serialize session for export");
                return None;
            }
        };
        if let Value::Object(map) = &mut value {
            map.insert("exportedAt".to_string(), json!(Utc::now()));
            map.insert("version".to_string(), json!(EXPORT_VERSION));
        }
        serde_json::to_string_pretty(&value).ok()
    }

    /// Imports a previously exported session under a fresh id, stamping
    /// `importedAt`, and saves it. The original id is discarded so imports
    /// never collide with existing sessions.
    pub fn import_session(&self, json_data: &str) -> Result<String, StoreError> {
        let mut session: Session = serde_json::from_str(json_data)
            .map_err(|err| StoreError::InvalidSession(err.to_string()))?;
        session.id = String::new();
        session.imported_at = Some(Utc::now());
        self.save(session)
    }
}
