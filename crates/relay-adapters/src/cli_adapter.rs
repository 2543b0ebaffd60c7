//! The process-backed backend adapter.
//!
//! Composes the process line streamer with the output parser: raw stdout
//! lines become text deltas, stderr lines are logged and withheld from the
//! caller, and the process's terminal error (if any) ends the stream.

use crate::cli_backend::CliBackend;
use crate::output_parser::parse_model_output_line;
use crate::process_stream::{LineSource, LineStream, SourcedLine, StreamOptions, spawn_stream_lines};
use async_trait::async_trait;
use futures::StreamExt;
use relay_proto::{BackendAdapter, BackendError, BackendKind, Delta, DeltaStream, InvokeRequest};

/// Adapter driving one backend's CLI as a child process.
pub struct CliAdapter {
    backend: CliBackend,
}

impl CliAdapter {
    pub fn new(backend: CliBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl BackendAdapter for CliAdapter {
    fn kind(&self) -> BackendKind {
        self.backend.kind
    }

    async fn invoke(&self, request: InvokeRequest) -> Result<DeltaStream, BackendError> {
        let options = StreamOptions {
            backend: self.backend.kind,
            program: self.backend.program.clone(),
            args: self.backend.args_with_prompt(&request.prompt),
            workspace_dir: request.workspace_dir,
            timeout: request.timeout,
            max_output_bytes: request.max_output_bytes,
            cancel: request.cancel,
        };
        let lines = spawn_stream_lines(options)?;
        Ok(delta_stream(lines, self.backend.kind))
    }
}

/// Turns the tagged line stream into a delta stream.
///
/// Each stdout line may expand to several deltas (or none); the stream ends
/// after the first error item.
fn delta_stream(lines: LineStream, backend: BackendKind) -> DeltaStream {
    futures::stream::unfold((lines, false), move |(lines, done)| async move {
        if done {
            return None;
        }
        match lines.next().await {
            Some(Ok(SourcedLine { source, line })) => match source {
                LineSource::Stdout => {
                    let deltas: Vec<Result<Delta, BackendError>> = parse_model_output_line(&line)
                        .into_iter()
                        .map(|text| Ok(Delta { text }))
                        .collect();
                    Some((deltas, (lines, false)))
                }
                LineSource::Stderr => {
                    tracing::debug!(%backend, stderr = %line, "backend stderr");
                    Some((Vec::new(), (lines, false)))
                }
            },
            Some(Err(err)) => Some((vec![Err(err)], (lines, true))),
            None => None,
        }
    })
    .map(futures::stream::iter)
    .flatten()
    .boxed()
}
