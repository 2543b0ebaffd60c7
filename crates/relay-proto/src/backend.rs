//! Backend identifiers and request routing modes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One external AI command-line tool the orchestrator can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Codex,
    Claude,
}

impl BackendKind {
    /// All backends the orchestrator knows about, in declaration order.
    pub const ALL: [BackendKind; 2] = [BackendKind::Codex, BackendKind::Claude];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Codex => "codex",
            BackendKind::Claude => "claude",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "codex" => Ok(BackendKind::Codex),
            "claude" => Ok(BackendKind::Claude),
            other => Err(UnknownBackend(other.to_string())),
        }
    }
}

/// Error returned when parsing an unrecognized backend name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown backend: {0}")]
pub struct UnknownBackend(pub String);

/// How a chat request selects its backend.
///
/// Explicit mode pins the request to one backend with no fallback;
/// automatic mode tries every known backend in router order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteMode {
    #[default]
    Auto,
    Explicit(BackendKind),
}

impl fmt::Display for RouteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMode::Auto => f.write_str("auto"),
            RouteMode::Explicit(backend) => f.write_str(backend.as_str()),
        }
    }
}

impl FromStr for RouteMode {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(RouteMode::Auto);
        }
        s.parse().map(RouteMode::Explicit)
    }
}
