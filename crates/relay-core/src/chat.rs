//! The chat orchestration state machine.
//!
//! `ChatService` drives candidate backends through the router, retries
//! transient failures, persists session state, and emits a stream of
//! lifecycle events. Per-backend circuit breakers live for the lifetime of
//! the service and are shared across all sessions.

use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::OrchestratorConfig;
use crate::router::BackendRouter;
use crate::store::{SessionStore, StoreError};
use futures::StreamExt;
use relay_proto::{
    BackendAdapter, BackendError, BackendKind, ChatEvent, ErrorCode, InvokeRequest, MessageRole,
    RequestRecord, RequestStatus, RouteMode, Session,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One chat request from a caller.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub prompt: String,
    /// Resume an existing session, or `None` to start a new one.
    pub session_id: Option<String>,
    pub mode: RouteMode,
    /// Caller-initiated abort for the whole request.
    pub cancel: Option<CancellationToken>,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: RouteMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Final buffered result of a chat request.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub session_id: String,
    pub backend: BackendKind,
    pub text: String,
}

/// Errors surfaced to callers of `chat` / `stream_chat`.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Incremental event stream handed to `stream_chat` callers.
pub type ChatEventStream = mpsc::UnboundedReceiver<ChatEvent>;

/// Read-only operational snapshot.
#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub default_backend: BackendKind,
    pub circuit_breakers: BTreeMap<String, BreakerSnapshot>,
}

struct PreparedChat {
    prompt: String,
    session: Session,
    mode: RouteMode,
    candidates: Vec<BackendKind>,
}

/// The orchestrator. Cheap to clone; clones share breakers, adapters, and
/// the store.
#[derive(Clone)]
pub struct ChatService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: OrchestratorConfig,
    router: BackendRouter,
    adapters: HashMap<BackendKind, Arc<dyn BackendAdapter>>,
    // Shared across concurrent requests; locked only for synchronous
    // transitions, never across an await point.
    breakers: Mutex<HashMap<BackendKind, CircuitBreaker>>,
    store: Arc<dyn SessionStore>,
}

impl ChatService {
    pub fn new(
        config: OrchestratorConfig,
        adapters: Vec<Arc<dyn BackendAdapter>>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let router = BackendRouter::new(config.default_backend);
        let mut breakers = HashMap::new();
        for backend in BackendKind::ALL {
            breakers.insert(
                backend,
                CircuitBreaker::new(config.breaker_failure_threshold, config.breaker_reset_ms),
            );
        }
        let adapters = adapters.into_iter().map(|a| (a.kind(), a)).collect();
        Self {
            inner: Arc::new(ServiceInner {
                config,
                router,
                adapters,
                breakers: Mutex::new(breakers),
                store,
            }),
        }
    }

    /// Buffered chat: drives the full pipeline and returns the final reply.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let prepared = self.inner.prepare(&request).await?;
        // Events are discarded in buffered mode.
        let (tx, _rx) = mpsc::unbounded_channel();
        self.inner.drive(prepared, request.cancel, &tx).await
    }

    /// Incremental chat: hard errors (empty prompt, store access) surface
    /// here; once the stream is returned, all failures arrive as
    /// `response.error` events followed by stream end.
    pub async fn stream_chat(&self, request: ChatRequest) -> Result<ChatEventStream, ChatError> {
        let prepared = self.inner.prepare(&request).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = self.inner.clone();
        let cancel = request.cancel;
        tokio::spawn(async move {
            if let Err(err) = inner.drive(prepared, cancel, &tx).await {
                tracing::debug!(error = %err, "chat stream ended in error");
            }
        });
        Ok(rx)
    }

    /// Operational snapshot of the service and its breakers.
    pub fn health(&self) -> HealthSnapshot {
        let breakers = self.inner.breakers.lock().expect("breaker lock poisoned");
        HealthSnapshot {
            status: "ok",
            default_backend: self.inner.router.primary(),
            circuit_breakers: breakers
                .iter()
                .map(|(backend, breaker)| (backend.as_str().to_string(), breaker.snapshot()))
                .collect(),
        }
    }
}

impl ServiceInner {
    async fn prepare(&self, request: &ChatRequest) -> Result<PreparedChat, ChatError> {
        let prompt = request.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(ChatError::EmptyPrompt);
        }
        let session = self
            .store
            .ensure_session(request.session_id.as_deref())
            .await?;
        self.store
            .append_message(&session.id, MessageRole::User, &prompt, None)
            .await?;
        let candidates = self.router.select(request.mode);
        Ok(PreparedChat {
            prompt,
            session,
            mode: request.mode,
            candidates,
        })
    }

    async fn drive(
        &self,
        prepared: PreparedChat,
        cancel: Option<CancellationToken>,
        tx: &mpsc::UnboundedSender<ChatEvent>,
    ) -> Result<ChatReply, ChatError> {
        let PreparedChat {
            prompt,
            session,
            mode,
            candidates,
        } = prepared;
        let cancel = cancel.unwrap_or_default();
        let mut last_error: Option<BackendError> = None;

        for backend in candidates {
            // One requestId per candidate; retries within it reuse both.
            let request_id = uuid::Uuid::new_v4().to_string();
            let started = Instant::now();

            // Automatic mode probes every candidate regardless of breaker
            // state and lets real failures update the bookkeeping.
            if mode != RouteMode::Auto && !self.breaker_allows(backend) {
                let err = BackendError::new(
                    backend,
                    ErrorCode::CircuitOpen,
                    format!("circuit breaker open for {backend}"),
                );
                tracing::warn!(%backend, %request_id, "request blocked by open circuit");
                self.log_outcome(&session.id, &request_id, backend, started, Some(&err))
                    .await?;
                let _ = tx.send(ChatEvent::error(&session.id, backend, &request_id, &err));
                last_error = Some(err);
                continue;
            }

            let _ = tx.send(ChatEvent::Start {
                session_id: session.id.clone(),
                backend,
                request_id: request_id.clone(),
            });

            match self
                .attempt_candidate(backend, &prompt, &session.id, &request_id, &cancel, tx)
                .await
            {
                Ok(text) => {
                    self.with_breaker(backend, CircuitBreaker::mark_success);
                    self.store
                        .append_message(&session.id, MessageRole::Assistant, &text, Some(backend))
                        .await?;
                    self.log_outcome(&session.id, &request_id, backend, started, None)
                        .await?;
                    let _ = tx.send(ChatEvent::End {
                        session_id: session.id.clone(),
                        backend,
                        request_id,
                        text: text.clone(),
                    });
                    return Ok(ChatReply {
                        session_id: session.id,
                        backend,
                        text,
                    });
                }
                Err(err) => {
                    let now = now_ms();
                    self.with_breaker(backend, |breaker| breaker.mark_failure(now));
                    self.log_outcome(&session.id, &request_id, backend, started, Some(&err))
                        .await?;
                    let _ = tx.send(ChatEvent::error(&session.id, backend, &request_id, &err));
                    if mode != RouteMode::Auto {
                        return Err(err.into());
                    }
                    tracing::warn!(%backend, error = %err, "candidate failed, trying next");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(BackendError::no_candidates).into())
    }

    async fn attempt_candidate(
        &self,
        backend: BackendKind,
        prompt: &str,
        session_id: &str,
        request_id: &str,
        cancel: &CancellationToken,
        tx: &mpsc::UnboundedSender<ChatEvent>,
    ) -> Result<String, BackendError> {
        let adapter = self.adapters.get(&backend).cloned().ok_or_else(|| {
            BackendError::new(
                backend,
                ErrorCode::UnknownError,
                format!("no adapter registered for {backend}"),
            )
        })?;

        // Output already streamed to the caller cannot be silently
        // discarded, so a candidate never retries once any delta has been
        // emitted, no matter how transient the failure.
        let mut saw_any_output = false;
        let mut attempt = 0;
        loop {
            let result = self
                .stream_attempt(
                    adapter.as_ref(),
                    backend,
                    prompt,
                    session_id,
                    request_id,
                    cancel.clone(),
                    &mut saw_any_output,
                    tx,
                )
                .await;
            match result {
                Ok(text) => return Ok(text),
                Err(err) => {
                    if err.is_transient() && !saw_any_output && attempt < self.config.retry_attempts
                    {
                        attempt += 1;
                        tracing::warn!(%backend, attempt, error = %err, "transient failure, retrying");
                        // Retries are immediate; no backoff.
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn stream_attempt(
        &self,
        adapter: &dyn BackendAdapter,
        backend: BackendKind,
        prompt: &str,
        session_id: &str,
        request_id: &str,
        cancel: CancellationToken,
        saw_any_output: &mut bool,
        tx: &mpsc::UnboundedSender<ChatEvent>,
    ) -> Result<String, BackendError> {
        let request = InvokeRequest {
            prompt: prompt.to_string(),
            session_id: session_id.to_string(),
            workspace_dir: self.config.workspace_dir.clone(),
            timeout: self.config.request_timeout(),
            max_output_bytes: self.config.max_output_bytes,
            cancel,
        };
        let mut deltas = adapter.invoke(request).await?;

        let mut partial = String::new();
        while let Some(item) = deltas.next().await {
            let delta = item?;
            let cleaned = strip_ansi_escapes::strip_str(&delta.text);
            if cleaned.is_empty() {
                continue;
            }
            partial.push_str(&cleaned);
            *saw_any_output = true;
            let _ = tx.send(ChatEvent::Delta {
                session_id: session_id.to_string(),
                backend,
                request_id: request_id.to_string(),
                text: cleaned,
            });
        }

        let text = partial.trim();
        if text.is_empty() {
            // A backend that streamed nothing is a failure even without a
            // process error.
            return Err(BackendError::new(
                backend,
                ErrorCode::EmptyOutput,
                "backend produced no output",
            ));
        }
        Ok(text.to_string())
    }

    async fn log_outcome(
        &self,
        session_id: &str,
        request_id: &str,
        backend: BackendKind,
        started: Instant,
        error: Option<&BackendError>,
    ) -> Result<(), StoreError> {
        let record = RequestRecord {
            request_id: request_id.to_string(),
            session_id: session_id.to_string(),
            backend,
            status: if error.is_some() {
                RequestStatus::Error
            } else {
                RequestStatus::Success
            },
            latency_ms: started.elapsed().as_millis() as u64,
            error_code: error.map(|e| e.code.as_str().to_string()),
            error_message: error.map(|e| e.message.clone()),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.store.log_request(record).await
    }

    fn breaker_allows(&self, backend: BackendKind) -> bool {
        let now = now_ms();
        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        // Every known backend gets a breaker at construction.
        breakers
            .get_mut(&backend)
            .map_or(true, |breaker| breaker.can_request(now))
    }

    fn with_breaker(&self, backend: BackendKind, f: impl FnOnce(&mut CircuitBreaker)) {
        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        if let Some(breaker) = breakers.get_mut(&backend) {
            f(breaker);
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
