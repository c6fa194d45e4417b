//! In-memory renderer engine for tests.
//!
//! [`MockEngine`] records every process and page it creates so tests can
//! assert on launches, closes and leaks without a browser installed.
//!
//! ```rust,ignore
//! let engine = MockEngine::new();
//! engine.fail_exports(true);
//! // ... run a render, then:
//! assert!(engine.pages().iter().all(MockPage::is_closed));
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::engine::{LaunchSpec, ProcessId, RendererEngine, RendererPage, RendererProcess};
use crate::error::{RenderError, Result};
use crate::options::ResolvedExportOptions;

#[derive(Debug, Default)]
struct Knobs {
    fail_launches: AtomicBool,
    fail_exports: AtomicBool,
    hang_exports: AtomicBool,
    fail_next_launch: AtomicBool,
    disconnect_on_load: AtomicBool,
    launch_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct EngineState {
    knobs: Knobs,
    next_id: AtomicU64,
    launch_count: AtomicUsize,
    launches: Mutex<Vec<LaunchSpec>>,
    processes: Mutex<Vec<MockProcess>>,
    pages: Mutex<Vec<MockPage>>,
}

/// Engine that fakes renderer processes in memory.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    state: Arc<EngineState>,
}

impl MockEngine {
    /// Creates an engine whose launches and exports succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent launch fail.
    pub fn fail_launches(&self, fail: bool) {
        self.state.knobs.fail_launches.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent export fail with [`RenderError::ExportFailed`].
    pub fn fail_exports(&self, fail: bool) {
        self.state.knobs.fail_exports.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent export hang until cancelled.
    pub fn hang_exports(&self, hang: bool) {
        self.state.knobs.hang_exports.store(hang, Ordering::SeqCst);
    }

    /// Makes only the next launch fail.
    pub fn fail_next_launch(&self) {
        self.state.knobs.fail_next_launch.store(true, Ordering::SeqCst);
    }

    /// Drops the owning process's connection while the next page is loading,
    /// as if the browser crashed mid-render.
    pub fn disconnect_during_load(&self) {
        self.state.knobs.disconnect_on_load.store(true, Ordering::SeqCst);
    }

    /// Delays every launch, widening race windows in concurrency tests.
    pub fn set_launch_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.state.knobs.launch_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of launch attempts, including failed ones.
    #[must_use]
    pub fn launch_count(&self) -> usize {
        self.state.launch_count.load(Ordering::SeqCst)
    }

    /// Launch specs in the order they were requested.
    #[must_use]
    pub fn launches(&self) -> Vec<LaunchSpec> {
        lock(&self.state.launches).clone()
    }

    /// Every process launched so far.
    #[must_use]
    pub fn processes(&self) -> Vec<MockProcess> {
        lock(&self.state.processes).clone()
    }

    /// Every page opened so far.
    #[must_use]
    pub fn pages(&self) -> Vec<MockPage> {
        lock(&self.state.pages).clone()
    }
}

impl RendererEngine for MockEngine {
    type Process = MockProcess;

    async fn launch(&self, spec: &LaunchSpec) -> Result<MockProcess> {
        self.state.launch_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.launches).push(spec.clone());

        let delay = Duration::from_millis(self.state.knobs.launch_delay_ms.load(Ordering::SeqCst));
        if !delay.is_zero() {
            if delay >= spec.timeout {
                async_io::Timer::after(spec.timeout).await;
                return Err(RenderError::LaunchTimeout {
                    path: spec.executable.clone(),
                    after: spec.timeout,
                });
            }
            async_io::Timer::after(delay).await;
        }

        if self.state.knobs.fail_launches.load(Ordering::SeqCst)
            || self.state.knobs.fail_next_launch.swap(false, Ordering::SeqCst)
        {
            return Err(RenderError::Launch {
                path: spec.executable.clone(),
                message: "mock launch failure".to_string(),
            });
        }

        let id = ProcessId(self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let process = MockProcess {
            inner: Arc::new(ProcessState {
                id,
                executable: spec.executable.clone(),
                connected: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                close_calls: AtomicUsize::new(0),
            }),
            engine: self.state.clone(),
        };
        lock(&self.state.processes).push(process.clone());
        Ok(process)
    }
}

#[derive(Debug)]
struct ProcessState {
    id: ProcessId,
    executable: PathBuf,
    connected: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

/// Fake renderer process.
#[derive(Debug, Clone)]
pub struct MockProcess {
    inner: Arc<ProcessState>,
    engine: Arc<EngineState>,
}

impl MockProcess {
    /// Simulates a crash: the connection drops and open pages stop working.
    pub fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of `close` calls.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }

    /// Executable this process was launched from.
    #[must_use]
    pub fn executable(&self) -> PathBuf {
        self.inner.executable.clone()
    }
}

impl RendererProcess for MockProcess {
    type Page = MockPage;

    fn id(&self) -> ProcessId {
        self.inner.id
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst) && !self.is_closed()
    }

    async fn new_page(&self) -> Result<MockPage> {
        if !self.is_connected() {
            return Err(RenderError::ProcessDisconnected);
        }
        let page = MockPage {
            inner: Arc::new(PageState {
                process: self.inner.id,
                closed: AtomicBool::new(false),
                content: Mutex::new(None),
            }),
            process: self.inner.clone(),
            engine: self.engine.clone(),
        };
        lock(&self.engine.pages).push(page.clone());
        Ok(page)
    }

    async fn close(&self) -> Result<()> {
        self.inner.close_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
struct PageState {
    process: ProcessId,
    closed: AtomicBool,
    content: Mutex<Option<String>>,
}

/// Fake page.
#[derive(Debug, Clone)]
pub struct MockPage {
    inner: Arc<PageState>,
    process: Arc<ProcessState>,
    engine: Arc<EngineState>,
}

impl MockPage {
    /// Process that owns this page.
    #[must_use]
    pub fn process_id(&self) -> ProcessId {
        self.inner.process
    }

    /// Last content loaded into the page.
    #[must_use]
    pub fn content(&self) -> Option<String> {
        lock(&self.inner.content).clone()
    }

    fn begin_load(&self) -> Result<()> {
        if self.engine.knobs.disconnect_on_load.swap(false, Ordering::SeqCst) {
            self.process.connected.store(false, Ordering::SeqCst);
        }
        self.check_alive()
    }

    fn check_alive(&self) -> Result<()> {
        if !self.process.connected.load(Ordering::SeqCst)
            || self.process.closed.load(Ordering::SeqCst)
        {
            return Err(RenderError::ProcessDisconnected);
        }
        if self.is_closed() {
            return Err(RenderError::LoadFailed("page is closed".to_string()));
        }
        Ok(())
    }
}

impl RendererPage for MockPage {
    async fn set_content(&self, html: &str) -> Result<()> {
        self.begin_load()?;
        *lock(&self.inner.content) = Some(html.to_string());
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.begin_load()?;
        *lock(&self.inner.content) = Some(format!("<!-- {url} -->"));
        Ok(())
    }

    async fn print_to_pdf(&self, options: &ResolvedExportOptions) -> Result<Vec<u8>> {
        self.check_alive()?;
        if self.engine.knobs.hang_exports.load(Ordering::SeqCst) {
            futures_lite::future::pending::<()>().await;
        }
        if self.engine.knobs.fail_exports.load(Ordering::SeqCst) {
            return Err(RenderError::ExportFailed("mock export failure".to_string()));
        }
        let content = self.content().unwrap_or_default();
        Ok(format!(
            "%PDF-1.7\n% {}x{}in landscape={}\n% {} bytes of content\n%%EOF\n",
            options.paper.width,
            options.paper.height,
            options.landscape,
            content.len()
        )
        .into_bytes())
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
