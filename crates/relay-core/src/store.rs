//! Session persistence.
//!
//! The orchestrator only depends on the [`SessionStore`] trait; the bundled
//! implementation keeps three append-mostly JSONL files (sessions, messages,
//! requests) under a data directory. Malformed lines are skipped on load.

use async_trait::async_trait;
use relay_proto::{BackendKind, ChatMessage, MessageRole, RequestRecord, Session};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Store operation errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("unknown session: {0}")]
    UnknownSession(String),
}

/// Persistence collaborator consumed by the chat service.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the session with the given id, creating it (or a brand new
    /// one when `id` is `None`) if it does not exist yet.
    async fn ensure_session(&self, id: Option<&str>) -> Result<Session, StoreError>;

    /// Appends a message and bumps the session's `updated_at`.
    async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        backend: Option<BackendKind>,
    ) -> Result<ChatMessage, StoreError>;

    /// Writes one request-log row.
    async fn log_request(&self, record: RequestRecord) -> Result<(), StoreError>;

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError>;

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError>;
}

/// JSONL-file-backed store.
///
/// A single mutex serializes writers; concurrent chat requests rely on this
/// to keep conflicting session updates ordered.
pub struct JsonlSessionStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn sessions_path(&self) -> PathBuf {
        self.dir.join("sessions.jsonl")
    }

    fn messages_path(&self) -> PathBuf {
        self.dir.join("messages.jsonl")
    }

    fn requests_path(&self) -> PathBuf {
        self.dir.join("requests.jsonl")
    }

    fn load_all<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    fn save_all<T: serde::Serialize>(path: &Path, rows: &[T]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut content = String::new();
        for row in rows {
            content.push_str(&serde_json::to_string(row)?);
            content.push('\n');
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    fn append_row<T: serde::Serialize>(path: &Path, row: &T) -> Result<(), StoreError> {
        use std::io::Write;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let mut line = serde_json::to_string(row)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn touch_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut sessions: Vec<Session> = Self::load_all(&self.sessions_path())?;
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| StoreError::UnknownSession(session_id.to_string()))?;
        session.touch();
        Self::save_all(&self.sessions_path(), &sessions)
    }
}

#[async_trait]
impl SessionStore for JsonlSessionStore {
    async fn ensure_session(&self, id: Option<&str>) -> Result<Session, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut sessions: Vec<Session> = Self::load_all(&self.sessions_path())?;
        if let Some(id) = id {
            if let Some(existing) = sessions.iter().find(|s| s.id == id) {
                return Ok(existing.clone());
            }
        }
        let session = Session::new(
            id.map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        );
        sessions.push(session.clone());
        Self::save_all(&self.sessions_path(), &sessions)?;
        tracing::debug!(session_id = %session.id, "created session");
        Ok(session)
    }

    async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        backend: Option<BackendKind>,
    ) -> Result<ChatMessage, StoreError> {
        let _guard = self.write_lock.lock().await;
        let message = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            backend,
            content: content.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        Self::append_row(&self.messages_path(), &message)?;
        self.touch_session(session_id)?;
        Ok(message)
    }

    async fn log_request(&self, record: RequestRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        Self::append_row(&self.requests_path(), &record)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        Self::load_all(&self.sessions_path())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let messages: Vec<ChatMessage> = Self::load_all(&self.messages_path())?;
        Ok(messages
            .into_iter()
            .filter(|m| m.session_id == session_id)
            .collect())
    }
}
