//! Consumer-facing chat lifecycle events.
//!
//! For a given `request_id` events always occur in the order
//! start -> (delta)* -> (end | error). The `end` event carries the full
//! accumulated text, not an increment.

use crate::backend::BackendKind;
use crate::error::{BackendError, ErrorCode};
use serde::{Deserialize, Serialize};

/// One event in the streaming chat lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    /// A backend candidate attempt group has begun.
    #[serde(rename = "response.start", rename_all = "camelCase")]
    Start {
        session_id: String,
        backend: BackendKind,
        request_id: String,
    },

    /// One incremental text fragment from the backend.
    #[serde(rename = "response.delta", rename_all = "camelCase")]
    Delta {
        session_id: String,
        backend: BackendKind,
        request_id: String,
        text: String,
    },

    /// The candidate fully succeeded; `text` is the complete reply.
    #[serde(rename = "response.end", rename_all = "camelCase")]
    End {
        session_id: String,
        backend: BackendKind,
        request_id: String,
        text: String,
    },

    /// The candidate failed; no further events carry this `request_id`.
    #[serde(rename = "response.error", rename_all = "camelCase")]
    Error {
        session_id: String,
        backend: BackendKind,
        request_id: String,
        code: ErrorCode,
        message: String,
    },
}

impl ChatEvent {
    /// Builds an error event from a normalized backend error.
    ///
    /// The `backend` parameter is the candidate being attempted; it wins over
    /// the error's own backend so that synthesized errors still tag the
    /// candidate they interrupted.
    pub fn error(session_id: &str, backend: BackendKind, request_id: &str, err: &BackendError) -> Self {
        ChatEvent::Error {
            session_id: session_id.to_string(),
            backend,
            request_id: request_id.to_string(),
            code: err.code,
            message: err.message.clone(),
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            ChatEvent::Start { request_id, .. }
            | ChatEvent::Delta { request_id, .. }
            | ChatEvent::End { request_id, .. }
            | ChatEvent::Error { request_id, .. } => request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_wire_format() {
        let event = ChatEvent::Start {
            session_id: "s1".to_string(),
            backend: BackendKind::Claude,
            request_id: "r1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "response.start");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["backend"], "claude");
        assert_eq!(json["requestId"], "r1");
    }

    #[test]
    fn test_error_wire_format() {
        let err = BackendError::new(BackendKind::Codex, ErrorCode::Timeout, "timed out");
        let event = ChatEvent::error("s1", BackendKind::Codex, "r1", &err);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "response.error");
        assert_eq!(json["code"], "TIMEOUT");
        assert_eq!(json["message"], "timed out");
    }

    #[test]
    fn test_delta_roundtrip() {
        let event = ChatEvent::Delta {
            session_id: "s1".to_string(),
            backend: BackendKind::Codex,
            request_id: "r9".to_string(),
            text: "hello".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ChatEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id(), "r9");
    }
}
