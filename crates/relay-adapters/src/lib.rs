//! # relay-adapters
//!
//! Process-backed backend adapters for the Relay orchestrator.
//!
//! This crate owns everything that touches a child process:
//! - Spawning and supervising backend CLIs with timeout, abort, and
//!   output-budget enforcement ([`process_stream`])
//! - Extracting human-readable text from heterogeneous line output
//!   ([`output_parser`])
//! - The concrete [`relay_proto::BackendAdapter`] implementation composing
//!   the two ([`CliAdapter`])

pub mod cli_adapter;
pub mod cli_backend;
pub mod output_parser;
pub mod process_stream;

pub use cli_adapter::CliAdapter;
pub use cli_backend::CliBackend;
pub use output_parser::parse_model_output_line;
pub use process_stream::{LineSource, LineStream, SourcedLine, StreamOptions, spawn_stream_lines};
