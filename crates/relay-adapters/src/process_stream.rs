//! Child-process line streaming.
//!
//! Spawns an external command and exposes its stdout/stderr as one ordered
//! sequence of tagged lines. A supervisor task enforces the timeout, the
//! caller's cancellation token, and the cumulative stdout budget, all of
//! which share a single two-phase termination path (SIGTERM, then SIGKILL
//! after a grace period). Only the first trigger's error is recorded.

use relay_core::AsyncQueue;
use relay_proto::{BackendError, BackendKind, ErrorCode};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Grace period between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_millis(1500);

/// How many trailing stderr lines are attached to process-death errors.
const STDERR_TAIL_LINES: usize = 20;

/// Which pipe a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSource {
    Stdout,
    Stderr,
}

/// One line of process output, tagged by pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedLine {
    pub source: LineSource,
    pub line: String,
}

/// Parameters for one process invocation.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Backend to blame in normalized errors.
    pub backend: BackendKind,
    pub program: String,
    pub args: Vec<String>,
    pub workspace_dir: PathBuf,
    pub timeout: Duration,
    pub max_output_bytes: u64,
    pub cancel: CancellationToken,
}

/// Handle to a running process's line sequence.
///
/// Dropping the stream before the process has finished asks the supervisor
/// to terminate it, so an abandoned consumer never leaks a child.
pub struct LineStream {
    queue: Arc<AsyncQueue<SourcedLine, BackendError>>,
    _consumer_guard: DropGuard,
}

impl std::fmt::Debug for LineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineStream").finish_non_exhaustive()
    }
}

impl LineStream {
    /// Awaits the next line.
    ///
    /// Returns lines in arrival order, then either `None` on clean exit or
    /// `Some(Err(_))` forever once the process has failed.
    pub async fn next(&self) -> Option<Result<SourcedLine, BackendError>> {
        self.queue.next().await
    }
}

/// Spawns the command and returns its tagged line stream.
///
/// An already-cancelled token fails fast with `REQUEST_ABORTED`; a spawn
/// failure surfaces as `SPAWN_FAILED`. Everything after a successful spawn
/// is reported through the stream itself.
pub fn spawn_stream_lines(options: StreamOptions) -> Result<LineStream, BackendError> {
    let backend = options.backend;
    if options.cancel.is_cancelled() {
        return Err(BackendError::new(
            backend,
            ErrorCode::RequestAborted,
            "request aborted before spawn",
        ));
    }

    let mut command = Command::new(&options.program);
    command
        .args(&options.args)
        .current_dir(&options.workspace_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| {
        BackendError::new(
            backend,
            ErrorCode::SpawnFailed,
            format!("failed to spawn {}: {e}", options.program),
        )
    })?;

    let queue = Arc::new(AsyncQueue::new());
    let consumer_gone = CancellationToken::new();
    let guard = consumer_gone.clone().drop_guard();

    tokio::spawn(supervise(child, options, queue.clone(), consumer_gone));

    Ok(LineStream {
        queue,
        _consumer_guard: guard,
    })
}

/// Owns the child until it exits: pumps both pipes into the queue, watches
/// the termination triggers, and classifies the exit.
async fn supervise(
    mut child: Child,
    options: StreamOptions,
    queue: Arc<AsyncQueue<SourcedLine, BackendError>>,
    consumer_gone: CancellationToken,
) {
    let backend = options.backend;

    // The stdout reader requests termination through this channel when the
    // byte budget is exceeded.
    let (limit_tx, mut limit_rx) = mpsc::channel::<()>(1);
    let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

    let stdout_task = child.stdout.take().map(|stdout| {
        let queue = queue.clone();
        let budget = options.max_output_bytes;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut total: u64 = 0;
            while let Ok(Some(line)) = lines.next_line().await {
                total += line.len() as u64 + 1;
                queue.push(SourcedLine {
                    source: LineSource::Stdout,
                    line,
                });
                if total > budget {
                    let _ = limit_tx.try_send(());
                    break;
                }
            }
        })
    });

    let stderr_task = child.stderr.take().map(|stderr| {
        let queue = queue.clone();
        let tail = stderr_tail.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                {
                    let mut tail = tail.lock().expect("stderr tail lock poisoned");
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.clone());
                }
                queue.push(SourcedLine {
                    source: LineSource::Stderr,
                    line,
                });
            }
        })
    });

    // Only the first trigger terminates and (if applicable) records an
    // error; later triggers are ignored.
    let mut termination_requested = false;
    let mut term_error: Option<BackendError> = None;
    let timeout = tokio::time::sleep(options.timeout);
    tokio::pin!(timeout);

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            () = &mut timeout, if !termination_requested => {
                termination_requested = true;
                term_error = Some(BackendError::new(
                    backend,
                    ErrorCode::Timeout,
                    format!("timed out after {}ms", options.timeout.as_millis()),
                ));
                tracing::warn!(%backend, "invocation timed out, terminating process");
                terminate(&mut child).await;
            }
            () = options.cancel.cancelled(), if !termination_requested => {
                termination_requested = true;
                term_error = Some(BackendError::new(
                    backend,
                    ErrorCode::RequestAborted,
                    "request aborted",
                ));
                terminate(&mut child).await;
            }
            Some(()) = limit_rx.recv(), if !termination_requested => {
                termination_requested = true;
                term_error = Some(BackendError::new(
                    backend,
                    ErrorCode::OutputLimit,
                    format!("stdout exceeded {} bytes", options.max_output_bytes),
                ));
                tracing::warn!(%backend, "output limit exceeded, terminating process");
                terminate(&mut child).await;
            }
            () = consumer_gone.cancelled(), if !termination_requested => {
                // Consumer walked away; clean up without recording an error.
                termination_requested = true;
                terminate(&mut child).await;
            }
        }
    };

    // All produced lines must be in the queue before the terminal state.
    join_reader(stdout_task).await;
    join_reader(stderr_task).await;

    if let Some(err) = term_error {
        queue.fail(err);
        return;
    }

    let tail = {
        let tail = stderr_tail.lock().expect("stderr tail lock poisoned");
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    };

    match status {
        Err(e) => queue.fail(BackendError::new(
            backend,
            ErrorCode::UnknownError,
            format!("failed to wait for process: {e}"),
        )),
        Ok(status) => match status.code() {
            Some(0) => queue.end(),
            Some(127) => queue.fail(
                BackendError::new(backend, ErrorCode::CommandNotFound, "command not found")
                    .with_details(tail),
            ),
            Some(126) => queue.fail(
                BackendError::new(
                    backend,
                    ErrorCode::PermissionDenied,
                    "command not executable",
                )
                .with_details(tail),
            ),
            Some(code) => queue.fail(
                BackendError::new(
                    backend,
                    ErrorCode::ProcessExitNonZero,
                    format!("process exited with code {code}"),
                )
                .with_details(tail),
            ),
            None => queue.fail(
                BackendError::new(
                    backend,
                    ErrorCode::ProcessSignal,
                    signal_message(&status),
                )
                .with_details(tail),
            ),
        },
    }
}

async fn join_reader(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        let _ = task.await;
    }
}

#[cfg(unix)]
fn signal_message(status: &std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(signal) => format!("process killed by signal {signal}"),
        None => "process killed by signal".to_string(),
    }
}

#[cfg(not(unix))]
fn signal_message(_status: &std::process::ExitStatus) -> String {
    "process terminated without exit code".to_string()
}

/// Two-phase termination: graceful signal first, hard kill after the grace
/// period if the process is still alive.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    #[cfg(not(unix))]
    {
        // No graceful signal off POSIX; go straight to kill.
        let _ = child.start_kill();
    }

    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}
