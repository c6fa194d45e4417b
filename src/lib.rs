//! # quire
//!
//! HTML to PDF through one shared, self-healing headless renderer.
//!
//! quire finds a usable Chrome/Chromium executable (installing one on demand
//! if allowed), keeps a single renderer process alive for reuse, and hands
//! every render its own page inside it. The process is replaced after a
//! configurable number of uses or when it drops its connection, and it is
//! drained cleanly on shutdown.
//!
//! ## Example
//!
//! ```rust,no_run
//! use quire::{ChromiumEngine, ExportOptions, PageFormat, Quire, RendererConfig};
//!
//! # async fn demo() -> Result<(), quire::Failure> {
//! let quire = Quire::new(ChromiumEngine::new(), RendererConfig::from_env());
//!
//! let pdf = quire
//!     .render_html_to_pdf(
//!         "<html><body>Hi</body></html>",
//!         Some(ExportOptions::new().with_page_format(PageFormat::A4)),
//!     )
//!     .await?;
//! assert!(pdf.starts_with(b"%PDF-"));
//!
//! quire.shutdown_renderer().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! - [`quire_core`]: data model, options, errors, engine traits, configuration.
//! - [`quire_locator`]: the discovery chain and installer.
//! - [`quire_pool`]: the shared process pool and single-flight acquisition.
//! - `quire_chromium` (feature `chromium`, on by default): the DevTools backend.

mod lifecycle;
mod render;
mod service;

pub use lifecycle::{Drain, LifecycleHooks, ShutdownOutcome, Signal, shutdown_signal};
pub use quire_core::*;
pub use quire_locator::{
    EngineProbe, InstallCommand, InstallMarker, LocateError, LocateReport, LocateStrategy, Probe,
    RendererLocator,
};
pub use quire_pool::{
    AcquisitionCoordinator, PageLease, PoolStats, Readiness, RendererHandle, RendererPool,
};
pub use render::{DocumentRenderer, RenderPhase};
pub use service::Quire;

#[cfg(feature = "chromium")]
pub use quire_chromium::{ChromiumEngine, ChromiumPage, ChromiumProcess};
