//! Relay command-line entry point.
//!
//! Sends one prompt through the orchestrator and streams the reply to
//! stdout. Logs go to stderr so piped output stays clean.

use anyhow::{Context, Result, bail};
use clap::Parser;
use relay_adapters::{CliAdapter, CliBackend};
use relay_core::{ChatRequest, ChatService, JsonlSessionStore, OrchestratorConfig};
use relay_proto::{BackendAdapter, BackendKind, ChatEvent, RouteMode};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay", version, about = "Resilient multi-backend AI CLI orchestrator")]
struct Cli {
    /// Prompt to send.
    prompt: String,

    /// Backend selection: "auto", or an explicit backend name (no fallback).
    #[arg(long, default_value = "auto")]
    backend: RouteMode,

    /// Resume an existing session.
    #[arg(long)]
    session: Option<String>,

    /// Configuration file (defaults are used when it does not exist).
    #[arg(long, default_value = "relay.yml")]
    config: PathBuf,

    /// Directory for session data.
    #[arg(long, default_value = ".relay")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        OrchestratorConfig::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        OrchestratorConfig::default()
    };

    let adapters: Vec<Arc<dyn BackendAdapter>> = BackendKind::ALL
        .iter()
        .map(|&kind| {
            Arc::new(CliAdapter::new(CliBackend::from_config(kind, &config)))
                as Arc<dyn BackendAdapter>
        })
        .collect();
    let store = Arc::new(JsonlSessionStore::new(&cli.data_dir));
    let service = ChatService::new(config, adapters, store);

    let mut request = ChatRequest::new(cli.prompt).with_mode(cli.backend);
    if let Some(session) = cli.session {
        request = request.with_session(session);
    }

    let mut events = service.stream_chat(request).await?;
    let mut stdout = std::io::stdout();
    let mut outcome: Option<Result<(), String>> = None;

    while let Some(event) = events.recv().await {
        match event {
            ChatEvent::Start {
                backend,
                session_id,
                ..
            } => {
                tracing::info!(%backend, %session_id, "response started");
            }
            ChatEvent::Delta { text, .. } => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            ChatEvent::End { session_id, .. } => {
                writeln!(stdout)?;
                tracing::info!(%session_id, "response complete");
                outcome = Some(Ok(()));
            }
            ChatEvent::Error {
                backend,
                code,
                message,
                ..
            } => {
                tracing::error!(%backend, %code, %message, "backend failed");
                // A later candidate may still succeed in auto mode.
                outcome = Some(Err(format!("{backend}: {code}: {message}")));
            }
        }
    }

    match outcome {
        Some(Ok(())) => Ok(()),
        Some(Err(message)) => bail!("{message}"),
        None => bail!("no backend produced a response"),
    }
}
