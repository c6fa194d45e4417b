//! Per-request document rendering.

use std::fmt;
use std::sync::Arc;

use quire_core::{
    ExportOptions, RenderError, RenderRequest, RenderSource, RendererEngine, RendererPage,
    ResolvedExportOptions, Result, Timeouts, deadline,
};
use quire_pool::{AcquisitionCoordinator, RendererPool};
use tracing::{debug, warn};

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Where a render call currently is.
///
/// `Errored` is entered from any step; a page that was opened always passes
/// through `PageClosing` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    /// Not started.
    Idle,
    /// Waiting for a verified renderer and a process checkout.
    AcquiringRenderer,
    /// A fresh page is open.
    PageOpen,
    /// Loading HTML or navigating.
    ContentLoading,
    /// Printing to PDF.
    Exporting,
    /// Releasing the page.
    PageClosing,
    /// Finished with bytes.
    Done,
    /// Finished with an error.
    Errored,
}

impl fmt::Display for RenderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AcquiringRenderer => "acquiring-renderer",
            Self::PageOpen => "page-open",
            Self::ContentLoading => "content-loading",
            Self::Exporting => "exporting",
            Self::PageClosing => "page-closing",
            Self::Done => "done",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Turns HTML or a URL into PDF bytes using a page from the shared pool.
///
/// The page is closed on every path out of [`render`](Self::render); the
/// shared process never is.
pub struct DocumentRenderer<E: RendererEngine> {
    coordinator: Arc<AcquisitionCoordinator>,
    pool: Arc<RendererPool<E>>,
    timeouts: Timeouts,
}

impl<E: RendererEngine> fmt::Debug for DocumentRenderer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentRenderer")
            .field("coordinator", &self.coordinator)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl<E: RendererEngine> Clone for DocumentRenderer<E> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            pool: self.pool.clone(),
            timeouts: self.timeouts,
        }
    }
}

impl<E: RendererEngine> DocumentRenderer<E> {
    /// Creates a renderer over a coordinator and pool sharing one readiness state.
    #[must_use]
    pub const fn new(
        coordinator: Arc<AcquisitionCoordinator>,
        pool: Arc<RendererPool<E>>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            coordinator,
            pool,
            timeouts,
        }
    }

    /// Renders an inline HTML document.
    ///
    /// # Errors
    ///
    /// See [`render`](Self::render).
    pub async fn render_html(&self, html: &str, options: ExportOptions) -> Result<Vec<u8>> {
        self.render(&RenderRequest::html(html, options)).await
    }

    /// Renders the document at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidRequest`] for an unsupported URL, else
    /// see [`render`](Self::render).
    pub async fn render_url(&self, url: &str, options: ExportOptions) -> Result<Vec<u8>> {
        self.render(&RenderRequest::url(url, options)?).await
    }

    /// Runs one render.
    ///
    /// # Errors
    ///
    /// - renderer unavailable: the discovery error, before any page opens
    /// - [`RenderError::RenderTimeout`] when loading or export exceeds its bound
    /// - [`RenderError::ExportFailed`] / [`RenderError::LoadFailed`] from the engine
    /// - [`RenderError::ProcessDisconnected`]; the pool is invalidated so the
    ///   next request relaunches
    pub async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>> {
        let options = request.options().resolve()?;
        let mut phase = Phase::default();

        phase.enter(RenderPhase::AcquiringRenderer);
        let handle = match self.acquire().await {
            Ok(handle) => handle,
            Err(error) => {
                phase.enter(RenderPhase::Errored);
                return Err(error);
            }
        };
        let generation = handle.generation();
        let lease = match self.pool.open_page(handle).await {
            Ok(lease) => lease,
            Err(error) => {
                phase.enter(RenderPhase::Errored);
                self.after_failure(&error, generation).await;
                return Err(error);
            }
        };

        phase.enter(RenderPhase::PageOpen);
        let outcome = self
            .load_and_export(lease.page(), request.source(), &options, &mut phase)
            .await;

        phase.enter(RenderPhase::PageClosing);
        self.pool.release(lease).await;

        match outcome {
            Ok(bytes) => {
                phase.enter(RenderPhase::Done);
                Ok(bytes)
            }
            Err(error) => {
                phase.enter(RenderPhase::Errored);
                warn!(%error, "render failed");
                self.after_failure(&error, generation).await;
                Err(error)
            }
        }
    }

    /// Readiness can be revoked between `ensure_ready` and checkout when a
    /// concurrent launch fails. That race gets one fresh discovery.
    async fn acquire(&self) -> Result<quire_pool::RendererHandle<E::Process>> {
        self.coordinator.ensure_ready().await?;
        match self.pool.acquire().await {
            Err(RenderError::Interrupted(reason)) => {
                debug!(%reason, "readiness revoked before checkout, acquiring again");
                self.coordinator.ensure_ready().await?;
                self.pool.acquire().await
            }
            other => other,
        }
    }

    async fn load_and_export(
        &self,
        page: &<E::Process as quire_core::RendererProcess>::Page,
        source: &RenderSource,
        options: &ResolvedExportOptions,
        phase: &mut Phase,
    ) -> Result<Vec<u8>> {
        phase.enter(RenderPhase::ContentLoading);
        let navigation = self.timeouts.navigation;
        let loaded = match source {
            RenderSource::Html(html) => deadline(navigation, page.set_content(html)).await,
            RenderSource::Url(url) => deadline(navigation, page.navigate(url.as_str())).await,
        };
        loaded.ok_or(RenderError::RenderTimeout {
            stage: "content-load",
            after: navigation,
        })??;

        phase.enter(RenderPhase::Exporting);
        let export = self.timeouts.export;
        let bytes = deadline(export, page.print_to_pdf(options))
            .await
            .ok_or(RenderError::RenderTimeout {
                stage: "export",
                after: export,
            })??;

        if !bytes.starts_with(PDF_MAGIC) {
            return Err(RenderError::ExportFailed(
                "renderer returned data without a PDF header".to_string(),
            ));
        }
        Ok(bytes)
    }

    async fn after_failure(&self, error: &RenderError, generation: u64) {
        if matches!(error, RenderError::ProcessDisconnected) {
            self.pool.invalidate_generation(generation).await;
        }
    }
}

#[derive(Debug, Default)]
struct Phase {
    current: Option<RenderPhase>,
}

impl Phase {
    fn enter(&mut self, next: RenderPhase) {
        let from = self.current.unwrap_or(RenderPhase::Idle);
        debug!(from = %from, to = %next, "render phase");
        self.current = Some(next);
    }
}
