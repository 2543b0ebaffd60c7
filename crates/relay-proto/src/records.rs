//! Persistence record types backing the session store.
//!
//! Three append-mostly tables: sessions, messages, and the per-candidate
//! request log. Timestamps are RFC 3339 strings.

use crate::backend::BackendKind;
use serde::{Deserialize, Serialize};

/// A conversation. Created on the first message, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: id.into(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Bumps `updated_at` to now. Called on every appended message.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One appended conversation message.
///
/// User messages carry no backend; assistant messages record which backend
/// produced them. A failed attempt never produces a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub backend: Option<BackendKind>,
    pub content: String,
    pub created_at: String,
}

/// Outcome of a backend candidate attempt group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Success,
    Error,
}

/// One request-log row, written exactly once per backend candidate when it
/// either succeeds or is exhausted (retries share the row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: String,
    pub session_id: String,
    pub backend: BackendKind,
    pub status: RequestStatus,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: String,
}
