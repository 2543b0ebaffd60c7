//! # relay-core
//!
//! Core orchestration functionality for Relay.
//!
//! This crate provides:
//! - The `ChatService` request pipeline (candidate selection, retries,
//!   failover, event emission, persistence)
//! - Per-backend circuit breakers
//! - The backend router (explicit vs automatic mode)
//! - An awaitable single-producer/single-consumer queue used by the process
//!   streaming layer
//! - Configuration loading and the session store

pub mod async_queue;
pub mod circuit_breaker;
pub mod chat;
pub mod config;
pub mod router;
pub mod store;

pub use async_queue::AsyncQueue;
pub use chat::{ChatError, ChatEventStream, ChatReply, ChatRequest, ChatService, HealthSnapshot};
pub use circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use config::OrchestratorConfig;
pub use router::BackendRouter;
pub use store::{JsonlSessionStore, SessionStore, StoreError};
