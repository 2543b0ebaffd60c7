//! # relay-proto
//!
//! Shared types, error definitions, and traits for the Relay orchestrator.
//!
//! This crate provides the foundational abstractions used across all Relay
//! crates, including:
//! - Backend identifiers and routing modes
//! - The normalized backend invocation error
//! - Consumer-facing chat lifecycle events
//! - Persistence record types (sessions, messages, request log)
//! - The `BackendAdapter` streaming contract

mod adapter;
mod backend;
mod error;
mod event;
mod records;

pub use adapter::{BackendAdapter, Delta, DeltaStream, InvokeRequest};
pub use backend::{BackendKind, RouteMode, UnknownBackend};
pub use error::{BackendError, ErrorCode};
pub use event::ChatEvent;
pub use records::{ChatMessage, MessageRole, RequestRecord, RequestStatus, Session};
