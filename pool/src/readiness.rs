use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use quire_core::RendererCandidate;
use tracing::info;

/// Whether a verified renderer executable is currently adopted.
///
/// Shared between the coordinator, which marks it ready, and the pool, which
/// launches from the adopted path and revokes readiness on disconnect.
#[derive(Debug, Default)]
pub struct Readiness {
    current: RwLock<Option<RendererCandidate>>,
}

impl Readiness {
    /// Creates a not-ready state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The adopted candidate, if ready.
    #[must_use]
    pub fn current(&self) -> Option<RendererCandidate> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Path of the adopted executable, if ready.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.current().map(|candidate| candidate.path)
    }

    /// Whether a candidate is adopted.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Adopts `candidate`.
    pub fn mark_ready(&self, candidate: RendererCandidate) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(candidate);
    }

    /// Drops the adopted candidate, returning it.
    pub fn revoke(&self) -> Option<RendererCandidate> {
        let revoked = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(candidate) = &revoked {
            info!(path = %candidate.path.display(), "renderer readiness revoked");
        }
        revoked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::SourceKind;

    #[test]
    fn revoke_returns_to_not_ready() {
        let readiness = Readiness::new();
        assert!(!readiness.is_ready());

        readiness.mark_ready(RendererCandidate::new(SourceKind::Bundled, "/opt/chrome").verified());
        assert_eq!(readiness.path(), Some(PathBuf::from("/opt/chrome")));

        assert!(readiness.revoke().is_some());
        assert!(!readiness.is_ready());
        assert!(readiness.revoke().is_none());
    }
}
