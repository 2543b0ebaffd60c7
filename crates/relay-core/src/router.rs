//! Backend candidate selection.

use relay_proto::{BackendKind, RouteMode};

/// Maps a request mode to the ordered list of backend candidates.
///
/// Explicit mode yields exactly one candidate with no fallback. Automatic
/// mode yields every known backend, configured primary first, to be tried in
/// order until one succeeds.
#[derive(Debug, Clone)]
pub struct BackendRouter {
    primary: BackendKind,
    known: Vec<BackendKind>,
}

impl BackendRouter {
    pub fn new(primary: BackendKind) -> Self {
        let mut known = vec![primary];
        known.extend(BackendKind::ALL.iter().copied().filter(|b| *b != primary));
        Self { primary, known }
    }

    pub fn primary(&self) -> BackendKind {
        self.primary
    }

    /// The ordered candidate list for one request.
    pub fn select(&self, mode: RouteMode) -> Vec<BackendKind> {
        match mode {
            RouteMode::Explicit(backend) => vec![backend],
            RouteMode::Auto => self.known.clone(),
        }
    }
}
