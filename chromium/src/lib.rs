//! Chrome DevTools Protocol backend for quire.
//!
//! [`ChromiumEngine`] launches Chrome, Chromium or `chrome-headless-shell`
//! through [`chromiumoxide`] and implements the `quire-core` engine traits.
//! Every launched process gets its own throwaway profile directory, removed
//! again when the process is closed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_lock::Mutex as AsyncMutex;
use chromiumoxide::Handler;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    EventDomContentEventFired, NavigateParams, PrintToPdfParams, SetDocumentContentParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures_lite::StreamExt;
use quire_core::{
    LaunchSpec, ProcessId, RenderError, RendererEngine, RendererPage, RendererProcess,
    ResolvedExportOptions, Result, deadline,
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

static NEXT_PROCESS: AtomicU64 = AtomicU64::new(0);

/// Launches renderer processes over the DevTools protocol.
#[derive(Debug, Clone, Default)]
pub struct ChromiumEngine {
    profile_root: Option<PathBuf>,
}

impl ChromiumEngine {
    /// Creates an engine that keeps profiles under the system temp directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps per-process profile directories under `root`.
    #[must_use]
    pub fn with_profile_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.profile_root = Some(root.into());
        self
    }

    fn profile_dir(&self, id: ProcessId) -> PathBuf {
        let root = self
            .profile_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        root.join(format!("quire-{}-{}", std::process::id(), id.0))
    }
}

impl RendererEngine for ChromiumEngine {
    type Process = ChromiumProcess;

    async fn launch(&self, spec: &LaunchSpec) -> Result<ChromiumProcess> {
        let id = ProcessId(NEXT_PROCESS.fetch_add(1, Ordering::SeqCst) + 1);
        let profile = self.profile_dir(id);

        debug!(
            process = %id,
            path = %spec.executable.display(),
            mode = ?spec.mode,
            "launching renderer"
        );
        let (browser, mut handler) = match launch_browser(spec, &profile).await {
            Ok(launched) => launched,
            Err(error) => {
                remove_profile(&profile).await;
                return Err(error);
            }
        };

        let connected = Arc::new(AtomicBool::new(true));
        let flag = connected.clone();
        let handler = tokio::spawn(async move {
            while handler.next().await.is_some() {}
            flag.store(false, Ordering::SeqCst);
            debug!(process = %id, "renderer connection closed");
        });

        Ok(ChromiumProcess {
            id,
            browser: AsyncMutex::new(Some(browser)),
            connected,
            handler: Mutex::new(Some(handler)),
            profile,
        })
    }
}

async fn launch_browser(spec: &LaunchSpec, profile: &Path) -> Result<(Browser, Handler)> {
    let launch_error = |message: String| RenderError::Launch {
        path: spec.executable.clone(),
        message,
    };
    tokio::fs::create_dir_all(profile)
        .await
        .map_err(|error| launch_error(format!("cannot create profile directory: {error}")))?;

    let config = BrowserConfig::builder()
        .chrome_executable(&spec.executable)
        .user_data_dir(profile)
        .launch_timeout(spec.timeout)
        .args(spec.args.iter().cloned())
        .build()
        .map_err(launch_error)?;

    deadline(spec.timeout, Browser::launch(config))
        .await
        .ok_or_else(|| RenderError::LaunchTimeout {
            path: spec.executable.clone(),
            after: spec.timeout,
        })?
        .map_err(|error| match error {
            CdpError::LaunchTimeout(_) => RenderError::LaunchTimeout {
                path: spec.executable.clone(),
                after: spec.timeout,
            },
            other => launch_error(other.to_string()),
        })
}

async fn remove_profile(profile: &Path) {
    if let Err(error) = tokio::fs::remove_dir_all(profile).await {
        debug!(profile = %profile.display(), %error, "profile directory not removed");
    }
}

/// A running Chrome process.
pub struct ChromiumProcess {
    id: ProcessId,
    browser: AsyncMutex<Option<Browser>>,
    connected: Arc<AtomicBool>,
    handler: Mutex<Option<JoinHandle<()>>>,
    profile: PathBuf,
}

impl std::fmt::Debug for ChromiumProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromiumProcess")
            .field("id", &self.id)
            .field("connected", &self.connected)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl RendererProcess for ChromiumProcess {
    type Page = ChromiumPage;

    fn id(&self) -> ProcessId {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn new_page(&self) -> Result<ChromiumPage> {
        let browser = self.browser.lock().await;
        let Some(browser) = browser.as_ref() else {
            return Err(RenderError::ProcessDisconnected);
        };
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|error| classify(&self.connected, error, RenderError::LoadFailed))?;
        Ok(ChromiumPage {
            page,
            connected: self.connected.clone(),
            closed: AtomicBool::new(false),
        })
    }

    async fn close(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };

        if let Err(error) = browser.close().await {
            debug!(process = %self.id, %error, "graceful close failed, killing");
            if let Some(Err(error)) = browser.kill().await {
                warn!(process = %self.id, %error, "failed to kill renderer");
            }
        } else if let Err(error) = browser.wait().await {
            debug!(process = %self.id, %error, "failed to reap renderer");
        }

        self.connected.store(false, Ordering::SeqCst);
        if let Some(handler) = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handler.abort();
        }
        remove_profile(&self.profile).await;
        Ok(())
    }
}

/// A tab inside a [`ChromiumProcess`].
#[derive(Debug)]
pub struct ChromiumPage {
    page: Page,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl RendererPage for ChromiumPage {
    async fn set_content(&self, html: &str) -> Result<()> {
        let frame = self
            .page
            .mainframe()
            .await
            .map_err(|error| self.load_error(error))?
            .ok_or_else(|| RenderError::LoadFailed("page has no main frame".to_string()))?;
        self.page
            .execute(SetDocumentContentParams::new(frame, html))
            .await
            .map_err(|error| self.load_error(error))?;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        // Subscribe first so the event cannot fire before we listen.
        let mut parsed = self
            .page
            .event_listener::<EventDomContentEventFired>()
            .await
            .map_err(|error| self.load_error(error))?;

        let response = self
            .page
            .execute(NavigateParams::new(url))
            .await
            .map_err(|error| self.load_error(error))?;
        if let Some(reason) = &response.result.error_text {
            return Err(RenderError::LoadFailed(format!("{url}: {reason}")));
        }

        if parsed.next().await.is_none() {
            return Err(if self.connected.load(Ordering::SeqCst) {
                RenderError::LoadFailed(format!("{url}: page went away before the DOM was parsed"))
            } else {
                RenderError::ProcessDisconnected
            });
        }
        Ok(())
    }

    async fn print_to_pdf(&self, options: &ResolvedExportOptions) -> Result<Vec<u8>> {
        let params = PrintToPdfParams {
            landscape: Some(options.landscape),
            display_header_footer: Some(options.display_header_footer),
            print_background: Some(options.print_background),
            scale: Some(options.scale),
            paper_width: Some(options.paper.width),
            paper_height: Some(options.paper.height),
            margin_top: Some(options.margins.top),
            margin_bottom: Some(options.margins.bottom),
            margin_left: Some(options.margins.left),
            margin_right: Some(options.margins.right),
            page_ranges: options.page_ranges.clone(),
            header_template: options.header_template.clone(),
            footer_template: options.footer_template.clone(),
            prefer_css_page_size: Some(options.prefer_css_page_size),
            ..PrintToPdfParams::default()
        };
        self.page
            .pdf(params)
            .await
            .map_err(|error| classify(&self.connected, error, RenderError::ExportFailed))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.page
            .clone()
            .close()
            .await
            .map_err(|error| classify(&self.connected, error, RenderError::LoadFailed))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ChromiumPage {
    fn load_error(&self, error: CdpError) -> RenderError {
        classify(&self.connected, error, RenderError::LoadFailed)
    }
}

/// A protocol error on a dead connection is a disconnect, whatever the call.
fn classify(
    connected: &AtomicBool,
    error: CdpError,
    otherwise: impl FnOnce(String) -> RenderError,
) -> RenderError {
    match error {
        CdpError::Ws(_) | CdpError::NoResponse => RenderError::ProcessDisconnected,
        _ if !connected.load(Ordering::SeqCst) => RenderError::ProcessDisconnected,
        other => otherwise(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use quire_core::{ExportOptions, LaunchSpec, PageFormat, ProgressSink, RendererConfig};
    use quire_locator::{EngineProbe, RendererLocator};

    async fn local_renderer() -> PathBuf {
        let config = RendererConfig::from_env().with_install(false);
        let probe = EngineProbe::new(ChromiumEngine::new(), config.timeouts.probe);
        RendererLocator::from_config(&config, probe)
            .locate(&ProgressSink::new())
            .await
            .expect("no local renderer found")
            .path
    }

    #[tokio::test]
    async fn failed_launch_leaves_no_profile_behind() {
        let root = tempfile::tempdir().unwrap();
        let engine = ChromiumEngine::new().with_profile_root(root.path());

        let result = engine
            .launch(&LaunchSpec::probe(
                root.path().join("missing/chrome"),
                Duration::from_secs(5),
            ))
            .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    #[ignore = "Requires a local Chrome/Chromium installation."]
    async fn prints_inline_html() {
        let path = local_renderer().await;
        let engine = ChromiumEngine::new();
        let process = engine
            .launch(&LaunchSpec::production(&path, Duration::from_secs(30)))
            .await
            .unwrap();

        let page = process.new_page().await.unwrap();
        page.set_content("<html><body><h1>Hi</h1></body></html>")
            .await
            .unwrap();
        let options = ExportOptions::new()
            .with_page_format(PageFormat::A4)
            .resolve()
            .unwrap();
        let pdf = page.print_to_pdf(&options).await.unwrap();
        assert!(pdf.starts_with(b"%PDF-"));

        page.close().await.unwrap();
        assert!(page.is_closed());
        process.close().await.unwrap();
        assert!(!process.is_connected());
        process.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires a local Chrome/Chromium installation."]
    async fn navigates_to_data_url() {
        let path = local_renderer().await;
        let process = ChromiumEngine::new()
            .launch(&LaunchSpec::production(&path, Duration::from_secs(30)))
            .await
            .unwrap();

        let page = process.new_page().await.unwrap();
        page.navigate("data:text/html,<p>landscape</p>").await.unwrap();
        let options = ExportOptions::new().with_landscape(true).resolve().unwrap();
        let pdf = page.print_to_pdf(&options).await.unwrap();
        assert!(pdf.starts_with(b"%PDF-"));

        process.close().await.unwrap();
    }
}
