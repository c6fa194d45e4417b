use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_channel::Sender;
use quire_core::{
    Discover, ExportOptions, Failure, ProgressReceiver, RenderError, RendererCandidate,
    RendererConfig, RendererEngine, Stage,
};
use quire_locator::{EngineProbe, RendererLocator};
use quire_pool::{AcquisitionCoordinator, PoolStats, Readiness, RendererPool};
use tracing::info;

use crate::lifecycle::Drain;
use crate::render::DocumentRenderer;

/// The rendering service as the rest of an application sees it.
///
/// One instance owns one pool and therefore at most one renderer process.
/// Share it by reference or `Arc`; every method takes `&self`.
///
/// Failures cross this boundary as structured [`Failure`] values.
pub struct Quire<E: RendererEngine> {
    config: RendererConfig,
    coordinator: Arc<AcquisitionCoordinator>,
    pool: Arc<RendererPool<E>>,
    renderer: DocumentRenderer<E>,
    shutting_down: AtomicBool,
}

impl<E: RendererEngine> std::fmt::Debug for Quire<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Quire")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .field("shutting_down", &self.shutting_down)
            .finish_non_exhaustive()
    }
}

impl<E: RendererEngine + Clone> Quire<E> {
    /// Creates a service using the standard discovery chain from `config`.
    ///
    /// Candidates are probed with `engine`.
    #[must_use]
    pub fn new(engine: E, config: RendererConfig) -> Self {
        let probe = EngineProbe::new(engine.clone(), config.timeouts.probe);
        let locator = RendererLocator::from_config(&config, probe);
        Self::with_discover(engine, config, locator)
    }
}

impl<E: RendererEngine> Quire<E> {
    /// Creates a service with a custom discovery implementation.
    #[must_use]
    pub fn with_discover(engine: E, config: RendererConfig, discover: impl Discover) -> Self {
        let readiness = Arc::new(Readiness::new());
        let coordinator = Arc::new(AcquisitionCoordinator::new(discover, readiness.clone()));
        let pool = Arc::new(RendererPool::from_config(engine, readiness, &config));
        let renderer = DocumentRenderer::new(coordinator.clone(), pool.clone(), config.timeouts);
        Self {
            config,
            coordinator,
            pool,
            renderer,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// The renderer used by this service, for callers that prefer [`RenderError`].
    #[must_use]
    pub const fn renderer(&self) -> &DocumentRenderer<E> {
        &self.renderer
    }

    /// Subscribes to acquisition stage changes.
    #[must_use]
    pub fn subscribe_progress(&self) -> ProgressReceiver {
        self.coordinator.progress().subscribe()
    }

    /// Makes sure a verified renderer is available.
    ///
    /// # Errors
    ///
    /// Returns the structured failure of discovery or installation.
    pub async fn ensure_renderer_ready(&self) -> Result<bool, Failure> {
        self.ensure_renderer().await.map(|_| true)
    }

    /// Like [`ensure_renderer_ready`](Self::ensure_renderer_ready), reporting
    /// stage changes to `progress`.
    ///
    /// Only stages of this call are forwarded; `progress` is not kept as a
    /// subscriber afterwards. A successful call always ends with
    /// [`Stage::Ready`], even when another caller finished discovery first.
    ///
    /// # Errors
    ///
    /// Returns the structured failure of discovery or installation.
    pub async fn ensure_renderer_ready_with_progress(
        &self,
        progress: Sender<Stage>,
    ) -> Result<bool, Failure> {
        if let Some(candidate) = self.coordinator.readiness().current() {
            let _ = progress.try_send(Stage::Ready {
                path: candidate.path,
            });
            return Ok(true);
        }

        let events = self.coordinator.progress().subscribe();
        let mut saw_ready = false;
        let mut forward = |stage: Stage| {
            saw_ready |= matches!(stage, Stage::Ready { .. });
            let _ = progress.try_send(stage);
        };

        let ensure = self.ensure_renderer();
        futures_lite::pin!(ensure);
        let outcome = loop {
            let step = futures_lite::future::or(
                async { Step::Done(ensure.as_mut().await) },
                async { Step::Stage(events.recv().await.ok()) },
            )
            .await;
            match step {
                Step::Done(outcome) => break outcome,
                Step::Stage(Some(stage)) => forward(stage),
                Step::Stage(None) => break ensure.as_mut().await,
            }
        };
        while let Ok(stage) = events.try_recv() {
            forward(stage);
        }

        let candidate = outcome?;
        if !saw_ready {
            let _ = progress.try_send(Stage::Ready {
                path: candidate.path,
            });
        }
        Ok(true)
    }

    /// Renders inline HTML to PDF bytes.
    ///
    /// # Errors
    ///
    /// Returns a structured failure; see [`DocumentRenderer::render`].
    pub async fn render_html_to_pdf(
        &self,
        html: &str,
        options: Option<ExportOptions>,
    ) -> Result<Vec<u8>, Failure> {
        self.check_open()?;
        self.renderer
            .render_html(html, options.unwrap_or_default())
            .await
            .map_err(Failure::from)
    }

    /// Renders the document at `url` to PDF bytes.
    ///
    /// # Errors
    ///
    /// Returns a structured failure; see [`DocumentRenderer::render`].
    pub async fn render_url_to_pdf(
        &self,
        url: &str,
        options: Option<ExportOptions>,
    ) -> Result<Vec<u8>, Failure> {
        self.check_open()?;
        self.renderer
            .render_url(url, options.unwrap_or_default())
            .await
            .map_err(Failure::from)
    }

    /// Drains the pool and refuses further work.
    ///
    /// Safe to call more than once.
    pub async fn shutdown_renderer(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("renderer service shutting down");
        }
        self.pool.close().await;
    }

    /// Whether [`shutdown_renderer`](Self::shutdown_renderer) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Pool diagnostics.
    pub async fn pool_stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    /// Number of discovery runs so far.
    #[must_use]
    pub fn discovery_count(&self) -> usize {
        self.coordinator.discovery_count()
    }

    /// Makes sure a verified renderer is available and returns it.
    ///
    /// # Errors
    ///
    /// Returns the structured failure of discovery or installation.
    pub async fn ensure_renderer(&self) -> Result<RendererCandidate, Failure> {
        self.check_open()?;
        self.coordinator
            .ensure_ready()
            .await
            .map_err(Failure::from)
    }

    fn check_open(&self) -> Result<(), Failure> {
        if self.is_shut_down() {
            return Err(Failure::from(RenderError::ShuttingDown));
        }
        Ok(())
    }
}

impl<E: RendererEngine> Drain for Quire<E> {
    async fn drain(&self) {
        self.shutdown_renderer().await;
    }
}

enum Step<T> {
    Done(T),
    Stage(Option<Stage>),
}
