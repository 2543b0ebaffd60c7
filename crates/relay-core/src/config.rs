//! Orchestrator configuration.
//!
//! Loaded from YAML with every field defaulted, so an empty file (or no file
//! at all) yields a working configuration.

use relay_proto::BackendKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on local retries within one backend candidate.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Override for how one backend's CLI is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCommandConfig {
    /// Executable name or path.
    pub program: String,
    /// Arguments placed before the prompt.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Per-attempt wall-clock budget in milliseconds.
    pub request_timeout_ms: u64,
    /// Cumulative stdout budget per attempt.
    pub max_output_bytes: u64,
    /// Consecutive failures before a backend's breaker opens.
    pub breaker_failure_threshold: u32,
    /// How long an open breaker blocks before probing, in milliseconds.
    pub breaker_reset_ms: u64,
    /// Local retries per candidate (0-3).
    pub retry_attempts: u32,
    /// Working directory handed to backend processes.
    pub workspace_dir: PathBuf,
    /// Primary backend, tried first in automatic mode.
    pub default_backend: BackendKind,
    /// Optional per-backend CLI invocation overrides.
    pub backend_commands: HashMap<BackendKind, BackendCommandConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 120_000,
            max_output_bytes: 1_048_576,
            breaker_failure_threshold: 3,
            breaker_reset_ms: 30_000,
            retry_attempts: 1,
            workspace_dir: PathBuf::from("."),
            default_backend: BackendKind::Codex,
            backend_commands: HashMap::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        Self::from_yaml(&content)
    }

    /// Parses configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config.clamped())
    }

    /// Applies field bounds. `retry_attempts` is capped at 3.
    pub fn clamped(mut self) -> Self {
        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            tracing::warn!(
                requested = self.retry_attempts,
                max = MAX_RETRY_ATTEMPTS,
                "retry_attempts exceeds the maximum, clamping"
            );
            self.retry_attempts = MAX_RETRY_ATTEMPTS;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}
