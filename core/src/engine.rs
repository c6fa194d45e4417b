//! The renderer engine seam.
//!
//! The pool and the document renderer only talk to a browser through these
//! traits. `quire-chromium` implements them over the Chrome DevTools
//! Protocol; the `test-utils` feature provides an in-memory implementation.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use crate::candidate::RendererCandidate;
use crate::error::Result;
use crate::options::ResolvedExportOptions;
use crate::progress::ProgressSink;

/// Boxed, sendable future used where trait objects need async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Flags shared by every launch. Headless mode itself is the engine's concern.
const PROBE_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-gpu",
    "--disable-dev-shm-usage",
];

/// Extra flags for the long-lived production process.
const PRODUCTION_ARGS: &[&str] = &[
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-translate",
    "--metrics-recording-only",
    "--mute-audio",
    "--hide-scrollbars",
    "--font-render-hinting=none",
];

/// Why a renderer is being launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Short-lived verification launch; closed right after it reports ready.
    Probe,
    /// The shared process that serves render requests.
    Production,
}

/// Everything an engine needs to start a renderer process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable to start.
    pub executable: PathBuf,
    /// Verification or production launch.
    pub mode: LaunchMode,
    /// Command line flags.
    pub args: Vec<String>,
    /// Bound on the time until the process reports ready.
    pub timeout: Duration,
}

impl LaunchSpec {
    /// Minimal sandbox-disabling launch used to verify a candidate.
    #[must_use]
    pub fn probe(executable: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            mode: LaunchMode::Probe,
            args: PROBE_ARGS.iter().map(ToString::to_string).collect(),
            timeout,
        }
    }

    /// Launch configuration for the shared production process.
    #[must_use]
    pub fn production(executable: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            mode: LaunchMode::Production,
            args: PROBE_ARGS
                .iter()
                .chain(PRODUCTION_ARGS)
                .map(ToString::to_string)
                .collect(),
            timeout,
        }
    }

    /// Appends an extra flag.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Executable path.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

/// Identity of a launched process, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "renderer#{}", self.0)
    }
}

/// Starts renderer processes.
pub trait RendererEngine: Send + Sync + 'static {
    /// Process type produced by this engine.
    type Process: RendererProcess;

    /// Launches a process and waits until it is ready to accept pages.
    ///
    /// Implementations must honour `spec.timeout` and report
    /// [`RenderError::LaunchTimeout`](crate::RenderError::LaunchTimeout)
    /// when it elapses.
    fn launch(&self, spec: &LaunchSpec) -> impl Future<Output = Result<Self::Process>> + Send;
}

/// A running renderer process.
pub trait RendererProcess: Send + Sync + 'static {
    /// Page type produced by this process.
    type Page: RendererPage;

    /// Identity of this process.
    fn id(&self) -> ProcessId;

    /// Whether the control connection is still alive.
    fn is_connected(&self) -> bool;

    /// Opens a fresh, isolated page.
    fn new_page(&self) -> impl Future<Output = Result<Self::Page>> + Send;

    /// Terminates the process. Calling it twice is a no-op.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// A single-use document context inside a renderer process.
pub trait RendererPage: Send + Sync + 'static {
    /// Replaces the document with `html`; resolves once the DOM is parsed.
    fn set_content(&self, html: &str) -> impl Future<Output = Result<()>> + Send;

    /// Navigates to `url`; resolves once the DOM content is parsed.
    fn navigate(&self, url: &str) -> impl Future<Output = Result<()>> + Send;

    /// Prints the current document to PDF.
    fn print_to_pdf(
        &self,
        options: &ResolvedExportOptions,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Closes the page. Calling it twice is a no-op.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;

    /// Whether [`close`](RendererPage::close) has completed.
    fn is_closed(&self) -> bool;
}

/// Finds and verifies a renderer executable.
pub trait Discover: Send + Sync + 'static {
    /// Runs discovery, reporting stage changes to `progress`.
    fn discover<'a>(&'a self, progress: &'a ProgressSink) -> BoxFuture<'a, Result<RendererCandidate>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_launch_extends_probe_flags() {
        let probe = LaunchSpec::probe("/usr/bin/chromium", Duration::from_secs(10));
        let production = LaunchSpec::production("/usr/bin/chromium", Duration::from_secs(30));

        assert_eq!(probe.mode, LaunchMode::Probe);
        assert!(probe.args.iter().any(|a| a == "--no-sandbox"));
        assert!(production.args.starts_with(&probe.args));
        assert!(production.args.len() > probe.args.len());
    }
}
