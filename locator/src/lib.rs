//! Ordered discovery chain for headless renderer executables.
//!
//! [`RendererLocator`] walks a fixed sequence of [`LocateStrategy`] steps and
//! adopts the first candidate that passes a launch [`Probe`]:
//!
//! 1. [`EnvironmentOverride`]: the executable named by configuration.
//! 2. [`WellKnownPaths`]: standard install paths for the host platform.
//! 3. [`ShellLookup`]: `which` / `where`.
//! 4. [`InstallMarkerLookup`]: the record left by a previous installation.
//! 5. [`BundledSearch`]: a copy shipped with the application.
//! 6. [`Installer`]: a fresh download, only when installs are allowed.
//!
//! A failing step never aborts the chain. Every step leaves an
//! [`AttemptTrace`] behind, and the whole log is returned in
//! [`RenderError::DiscoveryExhausted`] when nothing verifies.
//!
//! ```no_run
//! # async fn demo<E: quire_core::RendererEngine>(engine: E) -> quire_core::Result<()> {
//! use quire_core::{ProgressSink, RendererConfig};
//! use quire_locator::{EngineProbe, RendererLocator};
//!
//! let config = RendererConfig::from_env();
//! let probe = EngineProbe::new(engine, config.timeouts.probe);
//! let locator = RendererLocator::from_config(&config, probe);
//!
//! let candidate = locator.locate(&ProgressSink::new()).await?;
//! println!("using {}", candidate.path.display());
//! # Ok(())
//! # }
//! ```

mod error;
mod marker;
pub mod platform;
mod probe;
mod strategy;
mod tree;

use std::time::Instant;

use quire_core::{
    AttemptOutcome, AttemptTrace, BoxFuture, Discover, ProgressSink, RenderError,
    RendererCandidate, RendererConfig, Result, SourceKind, Stage,
};
use tracing::{debug, info, warn};

pub use error::LocateError;
pub use marker::InstallMarker;
pub use probe::{EngineProbe, Probe};
pub use strategy::{
    BundledSearch, CACHE_DIR_PLACEHOLDER, EnvironmentOverride, InstallCommand,
    InstallMarkerLookup, Installer, LocateContext, LocateStrategy, ShellLookup, WellKnownPaths,
};
pub use tree::MANIFEST_FILE;

/// Result of one discovery pass together with its attempt log.
#[derive(Debug, Clone)]
pub struct LocateReport {
    /// The adopted candidate, or why there is none.
    pub outcome: Result<RendererCandidate>,
    /// Every attempt in chain order.
    pub attempts: Vec<AttemptTrace>,
}

/// Walks the discovery chain.
pub struct RendererLocator {
    strategies: Vec<Box<dyn LocateStrategy>>,
    probe: Box<dyn Probe>,
}

impl std::fmt::Debug for RendererLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sources: Vec<SourceKind> = self.sources().collect();
        f.debug_struct("RendererLocator")
            .field("strategies", &sources)
            .finish_non_exhaustive()
    }
}

impl RendererLocator {
    /// Creates a locator with an empty chain.
    #[must_use]
    pub fn new(probe: impl Probe + 'static) -> Self {
        Self {
            strategies: Vec::new(),
            probe: Box::new(probe),
        }
    }

    /// Builds the standard chain from configuration.
    ///
    /// The installer step is left out when `config.allow_install` is false.
    #[must_use]
    pub fn from_config(config: &RendererConfig, probe: impl Probe + 'static) -> Self {
        let locator = Self::new(probe)
            .with_strategy(EnvironmentOverride::new(config.executable_override.clone()))
            .with_strategy(WellKnownPaths::for_host())
            .with_strategy(ShellLookup::for_host(config.timeouts.shell_lookup))
            .with_strategy(InstallMarkerLookup::new(&config.install_marker))
            .with_strategy(BundledSearch::new(config.bundled_dir.clone()));

        if config.allow_install {
            locator.with_strategy(Installer::new(
                config.cache_dir(),
                &config.install_marker,
                config.timeouts.install,
            ))
        } else {
            locator
        }
    }

    /// Appends a step to the chain.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl LocateStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Sources of the configured steps, in order.
    pub fn sources(&self) -> impl Iterator<Item = SourceKind> + '_ {
        self.strategies.iter().map(|strategy| strategy.source())
    }

    /// Runs the chain and returns the first verified candidate.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InstallFailed`] if the installer step ran and
    /// every invocation failed, otherwise [`RenderError::DiscoveryExhausted`]
    /// with the attempt log.
    pub async fn locate(&self, progress: &ProgressSink) -> Result<RendererCandidate> {
        self.locate_with_report(progress).await.outcome
    }

    /// Runs the chain and keeps the attempt log even on success.
    pub async fn locate_with_report(&self, progress: &ProgressSink) -> LocateReport {
        let ctx = LocateContext::new(self.probe.as_ref(), progress);
        let mut install_failure = None;

        for strategy in &self.strategies {
            let source = strategy.source();
            progress.emit(Stage::Locating { source });
            let recorded = ctx.attempt_count();
            let started = Instant::now();

            match strategy.locate(&ctx).await {
                Ok(Some(candidate)) => {
                    info!(source = %source, path = %candidate.path.display(), "renderer located");
                    return LocateReport {
                        outcome: Ok(candidate),
                        attempts: ctx.into_attempts(),
                    };
                }
                Ok(None) => {
                    if ctx.attempt_count() == recorded {
                        ctx.record(source, None, AttemptOutcome::NotFound, None, started);
                    }
                }
                Err(LocateError::Install(message)) => {
                    warn!(%message, "renderer installation failed");
                    ctx.record(
                        source,
                        None,
                        AttemptOutcome::StepFailed,
                        Some(message.clone()),
                        started,
                    );
                    install_failure = Some(message);
                }
                Err(error) => {
                    debug!(source = %source, %error, "discovery step failed");
                    let path = match &error {
                        LocateError::Missing(path) => Some(path.as_path()),
                        _ => None,
                    };
                    ctx.record(
                        source,
                        path,
                        AttemptOutcome::StepFailed,
                        Some(error.to_string()),
                        started,
                    );
                }
            }
        }

        let attempts = ctx.into_attempts();
        let outcome = match install_failure {
            Some(message) => Err(RenderError::InstallFailed(message)),
            None => Err(RenderError::DiscoveryExhausted {
                attempts: attempts.clone(),
            }),
        };
        LocateReport { outcome, attempts }
    }
}

impl Discover for RendererLocator {
    fn discover<'a>(&'a self, progress: &'a ProgressSink) -> BoxFuture<'a, Result<RendererCandidate>> {
        Box::pin(self.locate(progress))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Accepts only the listed paths and counts every probe.
    #[derive(Clone, Default)]
    struct MockProbe {
        accept: Arc<HashSet<PathBuf>>,
        calls: Arc<AtomicUsize>,
    }

    impl MockProbe {
        fn accepting(paths: &[&Path]) -> Self {
            Self {
                accept: Arc::new(paths.iter().map(|p| p.to_path_buf()).collect()),
                calls: Arc::default(),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Probe for MockProbe {
        fn probe<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.accept.contains(path) {
                    Ok(())
                } else {
                    Err(RenderError::Launch {
                        path: path.to_path_buf(),
                        message: "exited during startup".into(),
                    })
                }
            })
        }
    }

    /// Records whether the chain ever reached it.
    struct Tripwire {
        hits: Arc<AtomicUsize>,
    }

    impl LocateStrategy for Tripwire {
        fn source(&self) -> SourceKind {
            SourceKind::FreshlyInstalled
        }

        fn locate<'a>(
            &'a self,
            _ctx: &'a LocateContext<'a>,
        ) -> BoxFuture<'a, std::result::Result<Option<RendererCandidate>, LocateError>> {
            Box::pin(async move {
                self.hits.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
        }
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"#!/bin/sh\n").unwrap();
    }

    #[tokio::test]
    async fn bundled_copy_is_adopted_without_installing() {
        let dir = tempfile::tempdir().unwrap();
        let broken_override = dir.path().join("override/chrome");
        let broken_system = dir.path().join("system/chromium");
        let bundled = dir.path().join("bundle/linux/chrome");
        touch(&broken_override);
        touch(&broken_system);
        touch(&bundled);

        let probe = MockProbe::accepting(&[&bundled]);
        let installs = Arc::new(AtomicUsize::new(0));
        let locator = RendererLocator::new(probe.clone())
            .with_strategy(EnvironmentOverride::new(Some(broken_override.clone())))
            .with_strategy(WellKnownPaths::new(vec![broken_system.clone()]))
            .with_strategy(ShellLookup::new(
                "quire-test-no-such-lookup",
                ["chrome"],
                Duration::from_secs(2),
            ))
            .with_strategy(InstallMarkerLookup::new(dir.path().join("marker.json")))
            .with_strategy(
                BundledSearch::new(Some(dir.path().join("bundle"))).with_names(["chrome"]),
            )
            .with_strategy(Tripwire {
                hits: installs.clone(),
            });

        let progress = ProgressSink::new();
        let events = progress.subscribe();
        let report = locator.locate_with_report(&progress).await;

        let candidate = report.outcome.unwrap();
        assert_eq!(candidate.source, SourceKind::Bundled);
        assert_eq!(candidate.path, bundled);
        assert!(candidate.verified);
        assert_eq!(installs.load(Ordering::SeqCst), 0);
        assert_eq!(probe.calls(), 3);

        let outcomes: Vec<_> = report
            .attempts
            .iter()
            .map(|a| (a.source, a.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                (SourceKind::Environment, AttemptOutcome::ProbeFailed),
                (SourceKind::WellKnownPath, AttemptOutcome::ProbeFailed),
                (SourceKind::ShellLookup, AttemptOutcome::StepFailed),
                (SourceKind::InstallMarker, AttemptOutcome::NotFound),
                (SourceKind::Bundled, AttemptOutcome::Verified),
            ]
        );

        let mut stages = Vec::new();
        while let Ok(stage) = events.try_recv() {
            stages.push(stage);
        }
        assert_eq!(stages.len(), 5);
        assert!(!stages.iter().any(|s| matches!(s, Stage::Installing { .. })));
    }

    #[tokio::test]
    async fn exhaustion_carries_every_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let config = RendererConfig::new()
            .with_cache_dir(dir.path().join("cache"))
            .with_install(false);
        let locator = RendererLocator::from_config(&config, MockProbe::default());
        assert_eq!(locator.sources().count(), 5);

        let err = locator.locate(&ProgressSink::new()).await.unwrap_err();
        let RenderError::DiscoveryExhausted { attempts } = err else {
            panic!("expected exhaustion, got {err:?}");
        };
        assert!(attempts.len() >= 5);
        assert!(attempts.iter().all(|a| a.outcome != AttemptOutcome::Verified));
        assert_eq!(attempts.last().unwrap().source, SourceKind::Bundled);
    }

    #[tokio::test]
    async fn missing_override_is_a_step_failure() {
        let locator = RendererLocator::new(MockProbe::default()).with_strategy(
            EnvironmentOverride::new(Some(PathBuf::from("/definitely/not/chrome"))),
        );

        let report = locator.locate_with_report(&ProgressSink::new()).await;
        assert!(report.outcome.is_err());
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::StepFailed);
        assert_eq!(
            report.attempts[0].path.as_deref(),
            Some(Path::new("/definitely/not/chrome"))
        );
    }

    #[tokio::test]
    async fn marker_executable_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let executable = dir.path().join("cache/chrome-linux64/chrome");
        touch(&executable);
        let marker_path = dir.path().join("install-complete.json");
        InstallMarker::now(dir.path().join("cache"), Some(executable.clone()))
            .write(&marker_path)
            .await
            .unwrap();

        let locator = RendererLocator::new(MockProbe::accepting(&[&executable]))
            .with_strategy(InstallMarkerLookup::new(&marker_path));
        let candidate = locator.locate(&ProgressSink::new()).await.unwrap();
        assert_eq!(candidate.source, SourceKind::InstallMarker);
        assert_eq!(candidate.path, executable);
    }

    #[tokio::test]
    async fn failed_installs_surface_as_install_failure() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Installer::new(
            dir.path().join("cache"),
            dir.path().join("marker.json"),
            Duration::from_secs(5),
        )
        .with_commands(
            InstallCommand::new("quire-test-no-such-installer", ["{cache_dir}"]),
            Some(InstallCommand::new("quire-test-no-such-fallback", ["{cache_dir}"])),
        );
        let locator = RendererLocator::new(MockProbe::default()).with_strategy(installer);

        let progress = ProgressSink::new();
        let events = progress.subscribe();
        let err = locator.locate(&progress).await.unwrap_err();
        assert!(matches!(err, RenderError::InstallFailed(_)));

        let mut attempts = Vec::new();
        while let Ok(stage) = events.try_recv() {
            if let Stage::Installing { attempt } = stage {
                attempts.push(attempt);
            }
        }
        assert_eq!(attempts, vec![1, 2]);
        assert!(!dir.path().join("marker.json").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_lookup_uses_first_output_line() {
        // `echo NAME` prints NAME, standing in for `which NAME`.
        let probe = MockProbe::accepting(&[Path::new("headless-shell")]);
        let locator = RendererLocator::new(probe).with_strategy(ShellLookup::new(
            "echo",
            ["headless-shell"],
            Duration::from_secs(2),
        ));

        let candidate = locator.locate(&ProgressSink::new()).await.unwrap();
        assert_eq!(candidate.source, SourceKind::ShellLookup);
        assert_eq!(candidate.path, PathBuf::from("headless-shell"));
    }
}
