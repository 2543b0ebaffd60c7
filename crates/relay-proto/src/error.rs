//! The normalized backend invocation error.
//!
//! Every failure inside an adapter or the process streamer is converted into
//! a [`BackendError`] before it crosses into the orchestrator. The error code
//! fully determines whether the failure is transient (worth retrying or
//! failing over) or permanent.

use crate::backend::BackendKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified failure codes for backend invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The backend binary was found but exited with code 127.
    CommandNotFound,
    /// The backend binary exited with code 126.
    PermissionDenied,
    /// The process exited with a nonzero code other than 126/127.
    ProcessExitNonZero,
    /// The process died from an OS signal it did not request.
    ProcessSignal,
    /// The per-request timeout fired and the process was terminated.
    Timeout,
    /// The backend completed cleanly but streamed no usable text.
    EmptyOutput,
    /// The process could not be spawned at all.
    SpawnFailed,
    /// Cumulative stdout exceeded the configured byte limit.
    OutputLimit,
    /// The caller aborted the request.
    RequestAborted,
    /// The circuit breaker refused the request.
    CircuitOpen,
    /// Catch-all wrapper for unexpected failures.
    UnknownError,
    /// The router produced no candidates at all.
    NoCandidates,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::CommandNotFound => "COMMAND_NOT_FOUND",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::ProcessExitNonZero => "PROCESS_EXIT_NON_ZERO",
            ErrorCode::ProcessSignal => "PROCESS_SIGNAL",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::EmptyOutput => "EMPTY_OUTPUT",
            ErrorCode::SpawnFailed => "SPAWN_FAILED",
            ErrorCode::OutputLimit => "OUTPUT_LIMIT",
            ErrorCode::RequestAborted => "REQUEST_ABORTED",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
            ErrorCode::NoCandidates => "NO_CANDIDATES",
        }
    }

    /// Whether a failure with this code may resolve on retry or failover.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorCode::ProcessExitNonZero
                | ErrorCode::ProcessSignal
                | ErrorCode::Timeout
                | ErrorCode::EmptyOutput
                | ErrorCode::UnknownError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only error shape that crosses the adapter -> orchestrator boundary.
///
/// `backend` is `None` only for the synthesized `NO_CANDIDATES` error, which
/// has no backend to blame.
#[derive(Debug, Clone, thiserror::Error)]
pub struct BackendError {
    pub backend: Option<BackendKind>,
    pub code: ErrorCode,
    pub message: String,
    /// Extra context, typically the last stderr lines of a dead process.
    pub details: Option<String>,
}

impl BackendError {
    pub fn new(backend: BackendKind, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            backend: Some(backend),
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        let details = details.into();
        self.details = (!details.is_empty()).then_some(details);
        self
    }

    /// The synthesized error for an empty candidate list.
    pub fn no_candidates() -> Self {
        Self {
            backend: None,
            code: ErrorCode::NoCandidates,
            message: "no backend candidates available".to_string(),
            details: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.backend {
            Some(backend) => write!(f, "{}: {}: {}", backend, self.code, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}
