//! End-to-end orchestration flows with scripted backend adapters.

use async_trait::async_trait;
use futures::StreamExt;
use relay_core::{
    BreakerState, ChatError, ChatEventStream, ChatRequest, ChatService, JsonlSessionStore,
    OrchestratorConfig,
};
use relay_proto::{
    BackendAdapter, BackendError, BackendKind, ChatEvent, Delta, DeltaStream, ErrorCode,
    InvokeRequest, RouteMode,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// What one `invoke` call should do.
enum Script {
    /// Fail before any stream is produced.
    Reject(ErrorCode),
    /// Yield deltas, then fail mid-stream.
    MidStream(Vec<&'static str>, ErrorCode),
    /// Yield deltas, then end cleanly.
    Reply(Vec<&'static str>),
    /// End cleanly without producing anything.
    Silent,
}

struct ScriptedAdapter {
    kind: BackendKind,
    script: Mutex<VecDeque<Script>>,
    invocations: AtomicUsize,
}

impl ScriptedAdapter {
    fn new(kind: BackendKind, steps: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(steps.into()),
            invocations: AtomicUsize::new(0),
        })
    }

    fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendAdapter for ScriptedAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn invoke(&self, _request: InvokeRequest) -> Result<DeltaStream, BackendError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("adapter invoked more often than scripted");
        let deltas = |texts: Vec<&'static str>| {
            texts
                .into_iter()
                .map(|text| {
                    Ok(Delta {
                        text: text.to_string(),
                    })
                })
                .collect::<Vec<Result<Delta, BackendError>>>()
        };
        match step {
            Script::Reject(code) => Err(BackendError::new(self.kind, code, "scripted rejection")),
            Script::Reply(texts) => Ok(futures::stream::iter(deltas(texts)).boxed()),
            Script::MidStream(texts, code) => {
                let mut items = deltas(texts);
                items.push(Err(BackendError::new(self.kind, code, "scripted mid-stream failure")));
                Ok(futures::stream::iter(items).boxed())
            }
            Script::Silent => Ok(futures::stream::iter(deltas(Vec::new())).boxed()),
        }
    }
}

fn service_with(
    config: OrchestratorConfig,
    codex: Arc<ScriptedAdapter>,
    claude: Arc<ScriptedAdapter>,
) -> (TempDir, Arc<ChatService>) {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(JsonlSessionStore::new(tmp.path()));
    let service = Arc::new(ChatService::new(
        config,
        vec![codex as Arc<dyn BackendAdapter>, claude],
        store,
    ));
    (tmp, service)
}

async fn collect(mut events: ChatEventStream) -> Vec<ChatEvent> {
    let mut all = Vec::new();
    while let Some(event) = events.recv().await {
        all.push(event);
    }
    all
}

fn request_log_rows(tmp: &TempDir) -> Vec<serde_json::Value> {
    let path = tmp.path().join("requests.jsonl");
    let content = std::fs::read_to_string(path).unwrap_or_default();
    content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_auto_mode_fails_over_to_next_backend() {
    let codex = ScriptedAdapter::new(
        BackendKind::Codex,
        vec![
            Script::Reject(ErrorCode::ProcessExitNonZero),
            // Transient and nothing streamed: one local retry happens first.
            Script::Reject(ErrorCode::ProcessExitNonZero),
        ],
    );
    let claude = ScriptedAdapter::new(
        BackendKind::Claude,
        vec![Script::Reply(vec!["hello from claude"])],
    );
    let (tmp, service) = service_with(OrchestratorConfig::default(), codex.clone(), claude.clone());

    let reply = service.chat(ChatRequest::new("hi")).await.unwrap();
    assert_eq!(reply.backend, BackendKind::Claude);
    assert_eq!(reply.text, "hello from claude");
    assert_eq!(codex.invocations(), 2);
    assert_eq!(claude.invocations(), 1);

    // One log row per candidate, not per retry.
    let rows = request_log_rows(&tmp);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["backend"], "codex");
    assert_eq!(rows[0]["status"], "error");
    assert_eq!(rows[1]["backend"], "claude");
    assert_eq!(rows[1]["status"], "success");

    // The failed candidate counts one breaker failure for its whole group.
    let health = service.health();
    assert_eq!(health.circuit_breakers["codex"].failure_count, 1);
    assert_eq!(health.circuit_breakers["claude"].failure_count, 0);
}

#[tokio::test]
async fn test_explicit_mode_never_falls_back() {
    let codex = ScriptedAdapter::new(
        BackendKind::Codex,
        vec![Script::Reject(ErrorCode::CommandNotFound)],
    );
    let claude = ScriptedAdapter::new(BackendKind::Claude, vec![]);
    let (_tmp, service) =
        service_with(OrchestratorConfig::default(), codex.clone(), claude.clone());

    let err = service
        .chat(ChatRequest::new("hi").with_mode(RouteMode::Explicit(BackendKind::Codex)))
        .await
        .unwrap_err();
    match err {
        ChatError::Backend(err) => assert_eq!(err.code, ErrorCode::CommandNotFound),
        other => panic!("unexpected error: {other}"),
    }
    // Non-transient: no retry either.
    assert_eq!(codex.invocations(), 1);
    assert_eq!(claude.invocations(), 0);
}

#[tokio::test]
async fn test_no_retry_once_output_has_streamed() {
    let config = OrchestratorConfig {
        retry_attempts: 3,
        ..OrchestratorConfig::default()
    };
    let codex = ScriptedAdapter::new(
        BackendKind::Codex,
        vec![Script::MidStream(
            vec!["partial"],
            ErrorCode::ProcessExitNonZero,
        )],
    );
    let claude = ScriptedAdapter::new(BackendKind::Claude, vec![]);
    let (_tmp, service) = service_with(config, codex.clone(), claude);

    let err = service
        .chat(ChatRequest::new("hi").with_mode(RouteMode::Explicit(BackendKind::Codex)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Backend(_)));
    // Transient, retries available, but output already reached the caller.
    assert_eq!(codex.invocations(), 1);
}

#[tokio::test]
async fn test_retry_reuses_request_id_and_event_order() {
    let codex = ScriptedAdapter::new(
        BackendKind::Codex,
        vec![Script::Reject(ErrorCode::Timeout), Script::Reply(vec!["ok"])],
    );
    let claude = ScriptedAdapter::new(BackendKind::Claude, vec![]);
    let (tmp, service) = service_with(OrchestratorConfig::default(), codex.clone(), claude);

    let events = service
        .stream_chat(ChatRequest::new("hi").with_mode(RouteMode::Explicit(BackendKind::Codex)))
        .await
        .unwrap();
    let events = collect(events).await;

    assert_eq!(codex.invocations(), 2);
    assert!(matches!(events[0], ChatEvent::Start { .. }));
    assert!(matches!(events[1], ChatEvent::Delta { .. }));
    assert!(matches!(events[2], ChatEvent::End { .. }));
    assert_eq!(events.len(), 3);
    // The retry stays inside the same candidate attempt group.
    let request_id = events[0].request_id().to_string();
    assert!(events.iter().all(|e| e.request_id() == request_id));

    // And the log records one successful row for the group.
    let rows = request_log_rows(&tmp);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "success");
    assert_eq!(rows[0]["request_id"], request_id.as_str());
}

#[tokio::test]
async fn test_silent_backend_is_empty_output_failure() {
    let codex = ScriptedAdapter::new(BackendKind::Codex, vec![Script::Silent, Script::Silent]);
    let claude = ScriptedAdapter::new(BackendKind::Claude, vec![Script::Reply(vec!["fallback"])]);
    let (_tmp, service) = service_with(OrchestratorConfig::default(), codex.clone(), claude);

    let events = service.stream_chat(ChatRequest::new("hi")).await.unwrap();
    let events = collect(events).await;

    // Default retry budget of 1 burns both silent scripts.
    assert_eq!(codex.invocations(), 2);

    assert!(
        matches!(&events[1], ChatEvent::Error { code, backend, .. }
            if *code == ErrorCode::EmptyOutput && *backend == BackendKind::Codex)
    );
    assert!(
        matches!(events.last().unwrap(), ChatEvent::End { backend, text, .. }
            if *backend == BackendKind::Claude && text == "fallback")
    );
    // Each candidate carries its own request id.
    assert_ne!(events[0].request_id(), events[2].request_id());
}

#[tokio::test]
async fn test_breaker_opens_and_blocks_explicit_requests() {
    let config = OrchestratorConfig {
        breaker_failure_threshold: 2,
        retry_attempts: 0,
        ..OrchestratorConfig::default()
    };
    let codex = ScriptedAdapter::new(
        BackendKind::Codex,
        vec![
            Script::Reject(ErrorCode::ProcessExitNonZero),
            Script::Reject(ErrorCode::ProcessExitNonZero),
        ],
    );
    let claude = ScriptedAdapter::new(BackendKind::Claude, vec![]);
    let (_tmp, service) = service_with(config, codex.clone(), claude);

    let explicit = || ChatRequest::new("hi").with_mode(RouteMode::Explicit(BackendKind::Codex));
    assert!(service.chat(explicit()).await.is_err());
    assert!(service.chat(explicit()).await.is_err());

    let snapshot = &service.health().circuit_breakers["codex"];
    assert_eq!(snapshot.state, BreakerState::Open);
    assert_eq!(snapshot.failure_count, 2);

    // Blocked at the gate: the adapter is not invoked again.
    let err = service.chat(explicit()).await.unwrap_err();
    match err {
        ChatError::Backend(err) => assert_eq!(err.code, ErrorCode::CircuitOpen),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(codex.invocations(), 2);
}

#[tokio::test]
async fn test_auto_mode_probes_open_breaker() {
    let config = OrchestratorConfig {
        breaker_failure_threshold: 1,
        retry_attempts: 0,
        ..OrchestratorConfig::default()
    };
    let codex = ScriptedAdapter::new(
        BackendKind::Codex,
        vec![
            Script::Reject(ErrorCode::ProcessExitNonZero),
            Script::Reply(vec!["recovered"]),
        ],
    );
    let claude = ScriptedAdapter::new(BackendKind::Claude, vec![]);
    let (_tmp, service) = service_with(config, codex.clone(), claude);

    let err = service
        .chat(ChatRequest::new("hi").with_mode(RouteMode::Explicit(BackendKind::Codex)))
        .await;
    assert!(err.is_err());
    assert_eq!(
        service.health().circuit_breakers["codex"].state,
        BreakerState::Open
    );

    // Auto mode ignores the gate, probes codex, and the success closes the
    // breaker again.
    let reply = service.chat(ChatRequest::new("hi again")).await.unwrap();
    assert_eq!(reply.backend, BackendKind::Codex);
    assert_eq!(reply.text, "recovered");
    assert_eq!(codex.invocations(), 2);
    assert_eq!(
        service.health().circuit_breakers["codex"].state,
        BreakerState::Closed
    );
}

#[tokio::test]
async fn test_messages_persisted_only_on_success() {
    let codex = ScriptedAdapter::new(
        BackendKind::Codex,
        vec![Script::Reject(ErrorCode::CommandNotFound)],
    );
    let claude = ScriptedAdapter::new(BackendKind::Claude, vec![Script::Reply(vec!["saved"])]);
    let (tmp, service) = service_with(OrchestratorConfig::default(), codex, claude);

    // Failed explicit attempt: the user message persists, no assistant row.
    let failed = service
        .chat(
            ChatRequest::new("first")
                .with_session("s-fail")
                .with_mode(RouteMode::Explicit(BackendKind::Codex)),
        )
        .await;
    assert!(failed.is_err());

    // Successful attempt: assistant message tagged with the backend.
    service
        .chat(
            ChatRequest::new("second")
                .with_session("s-ok")
                .with_mode(RouteMode::Explicit(BackendKind::Claude)),
        )
        .await
        .unwrap();

    let content = std::fs::read_to_string(tmp.path().join("messages.jsonl")).unwrap();
    let rows: Vec<serde_json::Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    let fail_rows: Vec<_> = rows.iter().filter(|r| r["session_id"] == "s-fail").collect();
    assert_eq!(fail_rows.len(), 1);
    assert_eq!(fail_rows[0]["role"], "user");

    let ok_rows: Vec<_> = rows.iter().filter(|r| r["session_id"] == "s-ok").collect();
    assert_eq!(ok_rows.len(), 2);
    assert_eq!(ok_rows[1]["role"], "assistant");
    assert_eq!(ok_rows[1]["backend"], "claude");
}

#[tokio::test]
async fn test_deltas_arrive_in_order_and_end_carries_full_text() {
    let codex = ScriptedAdapter::new(
        BackendKind::Codex,
        vec![Script::Reply(vec!["to", "get", "her"])],
    );
    let claude = ScriptedAdapter::new(BackendKind::Claude, vec![]);
    let (_tmp, service) = service_with(OrchestratorConfig::default(), codex, claude);

    let events = service.stream_chat(ChatRequest::new("hi")).await.unwrap();
    let events = collect(events).await;

    let deltas: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::Delta { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["to", "get", "her"]);

    match events.last().unwrap() {
        ChatEvent::End { text, .. } => assert_eq!(text, "together"),
        other => panic!("unexpected final event: {other:?}"),
    }
}
