//! Launch probes that verify a candidate executable.

use std::path::Path;
use std::time::Duration;

use quire_core::{
    BoxFuture, LaunchSpec, RenderError, RendererEngine, RendererProcess, Result, deadline,
};
use tracing::{debug, warn};

/// Verifies that an executable starts and reports ready.
pub trait Probe: Send + Sync {
    /// Succeeds if a trial launch of `path` becomes ready within the probe bound.
    fn probe<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<()>>;
}

/// Probe backed by a [`RendererEngine`].
///
/// The probe instance is closed immediately after it reports ready; it is
/// never reused as the production process.
#[derive(Debug, Clone)]
pub struct EngineProbe<E> {
    engine: E,
    timeout: Duration,
}

impl<E> EngineProbe<E> {
    /// Creates a probe that launches through `engine` within `timeout`.
    #[must_use]
    pub const fn new(engine: E, timeout: Duration) -> Self {
        Self { engine, timeout }
    }
}

impl<E: RendererEngine> Probe for EngineProbe<E> {
    fn probe<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let spec = LaunchSpec::probe(path, self.timeout);
            let process = deadline(self.timeout, self.engine.launch(&spec))
                .await
                .ok_or_else(|| RenderError::LaunchTimeout {
                    path: path.to_path_buf(),
                    after: self.timeout,
                })??;

            debug!(path = %path.display(), process = %process.id(), "probe launch ready");
            if let Err(error) = process.close().await {
                warn!(path = %path.display(), %error, "failed to close probe instance");
            }
            Ok(())
        })
    }
}
