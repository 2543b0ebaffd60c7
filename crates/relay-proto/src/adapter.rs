//! The backend adapter streaming contract.
//!
//! A concrete adapter wraps one external command invocation and exposes it as
//! "given a prompt, produce a sequence of text deltas". Only this contract is
//! consumed by the orchestrator; command construction is adapter-specific.

use crate::backend::BackendKind;
use crate::error::BackendError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Parameters for one backend invocation attempt. Immutable per attempt.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub prompt: String,
    pub session_id: String,
    /// Working directory for the spawned process.
    pub workspace_dir: PathBuf,
    pub timeout: Duration,
    /// Cumulative stdout budget before the process is terminated.
    pub max_output_bytes: u64,
    /// Caller-initiated abort. Cancelling terminates the process.
    pub cancel: CancellationToken,
}

/// One incremental fragment of assistant output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub text: String,
}

/// The stream of deltas produced by one invocation attempt.
///
/// The stream yields at most one `Err`, after which it is exhausted.
pub type DeltaStream = BoxStream<'static, Result<Delta, BackendError>>;

/// Contract implemented once per backend.
///
/// Trait-based so tests can substitute scripted adapters for real child
/// processes.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Which backend this adapter drives.
    fn kind(&self) -> BackendKind;

    /// Starts one invocation attempt and returns its delta stream.
    ///
    /// Failures that occur before any output is available (spawn errors, an
    /// already-aborted token) are returned directly; failures mid-stream are
    /// yielded as the final stream item.
    async fn invoke(&self, request: InvokeRequest) -> Result<DeltaStream, BackendError>;
}
