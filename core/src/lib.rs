//! Core abstractions for quire.
//!
//! This crate holds everything the renderer pipeline shares across crate
//! boundaries:
//!
//! - **Data model**: [`RendererCandidate`], [`SourceKind`], [`AttemptTrace`]
//! - **Requests**: [`RenderRequest`], [`ExportOptions`], [`PageFormat`], [`Margins`]
//! - **Errors**: [`RenderError`] and the structured boundary shape [`Failure`]
//! - **Progress**: [`Stage`] events delivered through [`ProgressSink`]
//! - **Engine seam**: [`RendererEngine`], [`RendererProcess`], [`RendererPage`]
//!   and the [`Discover`] capability used by the acquisition coordinator
//! - **Configuration**: [`RendererConfig`] and [`Timeouts`]
//!
//! Nothing here launches a browser. Backends such as `quire-chromium`
//! implement the engine traits; the `test-utils` feature ships an in-memory
//! mock engine for tests.

mod candidate;
mod config;
mod engine;
mod error;
mod options;
mod progress;
mod time;

#[cfg(feature = "test-utils")]
pub mod testing;

pub use candidate::{AttemptOutcome, AttemptTrace, RendererCandidate, SourceKind};
pub use config::{RendererConfig, Timeouts};
pub use engine::{
    BoxFuture, Discover, LaunchMode, LaunchSpec, ProcessId, RendererEngine, RendererPage,
    RendererProcess,
};
pub use error::{ErrorKind, Failure, Remedy, RenderError, Result};
pub use options::{
    ExportOptions, Length, Margins, PageFormat, PaperSize, RenderRequest, RenderSource,
    ResolvedExportOptions, ResolvedMargins,
};
pub use progress::{ProgressReceiver, ProgressSink, Stage};
pub use time::deadline;
