//! The shared renderer process and its pages.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_lock::Mutex;
use quire_core::{
    LaunchSpec, ProcessId, RenderError, RendererConfig, RendererEngine, RendererPage,
    RendererProcess, Result, deadline,
};
use tracing::{debug, info, warn};

use crate::readiness::Readiness;

/// Default number of acquisitions before the process is replaced.
pub const DEFAULT_MAX_USES: u32 = 50;

/// A checkout of the shared process.
///
/// Returned by [`RendererPool::acquire`] and consumed by
/// [`RendererPool::open_page`]. It carries no way to reach the raw process.
#[derive(Debug)]
#[must_use = "a handle must be turned into a page with `RendererPool::open_page`"]
pub struct RendererHandle<P> {
    process: Arc<P>,
    generation: u64,
    use_count: u32,
}

impl<P: RendererProcess> RendererHandle<P> {
    /// Launch generation of the process; bumps on every relaunch.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Use count of the process after this acquisition.
    #[must_use]
    pub const fn use_count(&self) -> u32 {
        self.use_count
    }

    /// Identity of the process behind this handle.
    #[must_use]
    pub fn process_id(&self) -> ProcessId {
        self.process.id()
    }
}

/// An exclusive page inside the shared process.
///
/// Give it back with [`RendererPool::release`]; that closes the page and
/// nothing else.
#[derive(Debug)]
#[must_use = "a page lease must be released with `RendererPool::release`"]
pub struct PageLease<G> {
    id: u64,
    generation: u64,
    process: ProcessId,
    page: Arc<G>,
}

impl<G: RendererPage> PageLease<G> {
    /// The page.
    #[must_use]
    pub fn page(&self) -> &G {
        &self.page
    }

    /// Launch generation of the owning process.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Identity of the owning process.
    #[must_use]
    pub const fn process_id(&self) -> ProcessId {
        self.process
    }
}

/// Snapshot of pool state for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Launch generation of the current process; 0 before the first launch.
    pub generation: u64,
    /// Acquisitions of the current process.
    pub use_count: u32,
    /// Restart threshold.
    pub max_uses: u32,
    /// Pages currently leased out, across all processes.
    pub open_pages: usize,
    /// Retired processes still waiting for their last page.
    pub retiring: usize,
    /// Whether a connected current process exists.
    pub connected: bool,
}

struct Slot<P> {
    process: Arc<P>,
    generation: u64,
    use_count: u32,
    checkouts: usize,
}

struct PoolState<P: RendererProcess> {
    current: Option<Slot<P>>,
    retiring: Vec<Slot<P>>,
    pages: HashMap<u64, Arc<P::Page>>,
    next_page: u64,
    generation: u64,
    closed: bool,
}

impl<P: RendererProcess> Default for PoolState<P> {
    fn default() -> Self {
        Self {
            current: None,
            retiring: Vec::new(),
            pages: HashMap::new(),
            next_page: 0,
            generation: 0,
            closed: false,
        }
    }
}

impl<P: RendererProcess> PoolState<P> {
    /// Returns a checkout; hands back a retired process once its last one is in.
    fn check_in(&mut self, generation: u64) -> Option<Arc<P>> {
        if let Some(slot) = self.current.as_mut().filter(|s| s.generation == generation) {
            slot.checkouts = slot.checkouts.saturating_sub(1);
            return None;
        }
        let index = self
            .retiring
            .iter()
            .position(|slot| slot.generation == generation)?;
        let slot = &mut self.retiring[index];
        slot.checkouts = slot.checkouts.saturating_sub(1);
        (slot.checkouts == 0).then(|| self.retiring.swap_remove(index).process)
    }

    /// Takes the current process out of service.
    ///
    /// Returns it when it can be closed now; otherwise it waits in
    /// `retiring` for its remaining checkouts.
    fn retire_current(&mut self) -> Option<Arc<P>> {
        let slot = self.current.take()?;
        if slot.checkouts == 0 || !slot.process.is_connected() {
            Some(slot.process)
        } else {
            debug!(
                generation = slot.generation,
                checkouts = slot.checkouts,
                "deferring close of retired renderer"
            );
            self.retiring.push(slot);
            None
        }
    }
}

/// Owner of the one shared renderer process.
///
/// All creation, replacement and destruction of the process goes through
/// [`acquire`](Self::acquire), [`release`](Self::release) and
/// [`drain`](Self::drain). Pages are the unit of isolation: every render gets
/// its own, and releasing it never touches the process.
///
/// The process is replaced when it disconnects or after `max_uses`
/// acquisitions. A replaced process that still serves pages is closed when its
/// last page is released.
pub struct RendererPool<E: RendererEngine> {
    engine: E,
    readiness: Arc<Readiness>,
    max_uses: u32,
    launch_timeout: Duration,
    state: Mutex<PoolState<E::Process>>,
}

impl<E: RendererEngine + std::fmt::Debug> std::fmt::Debug for RendererPool<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererPool")
            .field("engine", &self.engine)
            .field("max_uses", &self.max_uses)
            .field("launch_timeout", &self.launch_timeout)
            .finish_non_exhaustive()
    }
}

impl<E: RendererEngine> RendererPool<E> {
    /// Creates an empty pool that launches from the path adopted in `readiness`.
    #[must_use]
    pub fn new(engine: E, readiness: Arc<Readiness>) -> Self {
        Self {
            engine,
            readiness,
            max_uses: DEFAULT_MAX_USES,
            launch_timeout: Duration::from_secs(30),
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Creates a pool using the restart threshold and launch bound from `config`.
    #[must_use]
    pub fn from_config(engine: E, readiness: Arc<Readiness>, config: &RendererConfig) -> Self {
        Self::new(engine, readiness)
            .with_max_uses(config.max_uses)
            .with_launch_timeout(config.timeouts.launch)
    }

    /// Sets the restart threshold (at least 1).
    #[must_use]
    pub fn with_max_uses(mut self, max_uses: u32) -> Self {
        self.max_uses = max_uses.max(1);
        self
    }

    /// Sets the production launch bound.
    #[must_use]
    pub const fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }

    /// Shared readiness state.
    #[must_use]
    pub const fn readiness(&self) -> &Arc<Readiness> {
        &self.readiness
    }

    /// Restart threshold.
    #[must_use]
    pub const fn max_uses(&self) -> u32 {
        self.max_uses
    }

    /// Checks out the shared process, launching or replacing it when needed.
    ///
    /// The process is (re)launched when there is none, when it reports
    /// disconnected, or when it has reached `max_uses`. The decision and the
    /// launch happen under the pool lock, so concurrent callers trigger at
    /// most one relaunch.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ShuttingDown`] after [`close`](Self::close),
    /// [`RenderError::Interrupted`] if no renderer is adopted, or a launch
    /// error. A failed launch revokes readiness so the next request
    /// runs discovery again.
    pub async fn acquire(&self) -> Result<RendererHandle<E::Process>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(RenderError::ShuttingDown);
        }

        let replace = state.current.as_ref().is_none_or(|slot| {
            !slot.process.is_connected() || slot.use_count >= self.max_uses
        });
        if replace {
            let path = self.readiness.path().ok_or_else(|| {
                RenderError::Interrupted("renderer readiness was revoked".to_string())
            })?;

            if let Some(slot) = &state.current {
                info!(
                    generation = slot.generation,
                    use_count = slot.use_count,
                    connected = slot.process.is_connected(),
                    "replacing renderer process"
                );
            }
            if let Some(old) = state.retire_current() {
                close_process(&*old).await;
            }

            let process = match self.launch(&path).await {
                Ok(process) => process,
                Err(error) => {
                    self.readiness.revoke();
                    return Err(error);
                }
            };
            state.generation += 1;
            info!(
                generation = state.generation,
                process = %process.id(),
                path = %path.display(),
                "renderer process launched"
            );
            state.current = Some(Slot {
                process: Arc::new(process),
                generation: state.generation,
                use_count: 0,
                checkouts: 0,
            });
        }

        let Some(slot) = state.current.as_mut() else {
            return Err(RenderError::ProcessDisconnected);
        };
        slot.use_count += 1;
        slot.checkouts += 1;
        Ok(RendererHandle {
            process: slot.process.clone(),
            generation: slot.generation,
            use_count: slot.use_count,
        })
    }

    /// Opens a fresh page on the checked-out process.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if the page cannot be created; the
    /// checkout is returned either way.
    pub async fn open_page(
        &self,
        handle: RendererHandle<E::Process>,
    ) -> Result<PageLease<<E::Process as RendererProcess>::Page>> {
        let opened = handle.process.new_page().await;

        let mut state = self.state.lock().await;
        let page = match opened {
            Ok(page) => Arc::new(page),
            Err(error) => {
                let retired = state.check_in(handle.generation);
                drop(state);
                if let Some(process) = retired {
                    close_process(&*process).await;
                }
                return Err(error);
            }
        };

        state.next_page += 1;
        let id = state.next_page;
        state.pages.insert(id, page.clone());
        debug!(page = id, generation = handle.generation, "page opened");
        Ok(PageLease {
            id,
            generation: handle.generation,
            process: handle.process.id(),
            page,
        })
    }

    /// Closes the leased page. The shared process stays up.
    pub async fn release(&self, lease: PageLease<<E::Process as RendererProcess>::Page>) {
        if let Err(error) = lease.page.close().await {
            warn!(page = lease.id, %error, "failed to close page");
        }

        let retired = {
            let mut state = self.state.lock().await;
            state.pages.remove(&lease.id);
            state.check_in(lease.generation)
        };
        debug!(page = lease.id, generation = lease.generation, "page released");

        if let Some(process) = retired {
            debug!(generation = lease.generation, "closing retired renderer after its last page");
            close_process(&*process).await;
        }
    }

    /// Takes the current process out of service and revokes readiness.
    ///
    /// Used when a render observes a disconnect; the next request runs
    /// discovery and relaunches.
    pub async fn invalidate(&self) {
        let retired = self.state.lock().await.retire_current();
        self.readiness.revoke();
        if let Some(process) = retired {
            close_process(&*process).await;
        }
    }

    /// Like [`invalidate`](Self::invalidate), but only if `generation` is
    /// still the current process.
    ///
    /// A late report about an already replaced process leaves the fresh one
    /// alone.
    pub async fn invalidate_generation(&self, generation: u64) {
        let retired = {
            let mut state = self.state.lock().await;
            match &state.current {
                Some(slot) if slot.generation == generation => state.retire_current(),
                _ => return,
            }
        };
        self.readiness.revoke();
        if let Some(process) = retired {
            close_process(&*process).await;
        }
    }

    /// Closes every open page, then every process, and empties the pool.
    ///
    /// Calling it on an empty pool is a no-op.
    pub async fn drain(&self) {
        let mut state = self.state.lock().await;
        let pages: Vec<_> = state.pages.drain().collect();
        let current = state.current.take();
        let retiring = std::mem::take(&mut state.retiring);

        if pages.is_empty() && current.is_none() && retiring.is_empty() {
            debug!("drain on empty pool");
            return;
        }
        info!(
            pages = pages.len(),
            retiring = retiring.len(),
            "draining renderer pool"
        );

        for (id, page) in pages {
            if let Err(error) = page.close().await {
                warn!(page = id, %error, "failed to close page during drain");
            }
        }
        for slot in current.into_iter().chain(retiring) {
            close_process(&*slot.process).await;
        }
    }

    /// Drains the pool and refuses every later [`acquire`](Self::acquire).
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.drain().await;
    }

    /// Whether [`close`](Self::close) was called.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Current pool statistics.
    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let current = state.current.as_ref();
        PoolStats {
            generation: current.map_or(0, |slot| slot.generation),
            use_count: current.map_or(0, |slot| slot.use_count),
            max_uses: self.max_uses,
            open_pages: state.pages.len(),
            retiring: state.retiring.len(),
            connected: current.is_some_and(|slot| slot.process.is_connected()),
        }
    }

    async fn launch(&self, path: &Path) -> Result<E::Process> {
        let spec = LaunchSpec::production(path, self.launch_timeout);
        deadline(self.launch_timeout, self.engine.launch(&spec))
            .await
            .ok_or_else(|| RenderError::LaunchTimeout {
                path: path.to_path_buf(),
                after: self.launch_timeout,
            })?
    }
}

async fn close_process<P: RendererProcess>(process: &P) {
    if let Err(error) = process.close().await {
        warn!(process = %process.id(), %error, "failed to close renderer process");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::testing::MockEngine;
    use quire_core::{RendererCandidate, SourceKind};

    fn pool(max_uses: u32) -> (MockEngine, RendererPool<MockEngine>) {
        let engine = MockEngine::new();
        let readiness = Arc::new(Readiness::new());
        readiness.mark_ready(RendererCandidate::new(SourceKind::Bundled, "/opt/chrome").verified());
        let pool = RendererPool::new(engine.clone(), readiness).with_max_uses(max_uses);
        (engine, pool)
    }

    async fn render_once(pool: &RendererPool<MockEngine>) -> ProcessId {
        let handle = pool.acquire().await.unwrap();
        let lease = pool.open_page(handle).await.unwrap();
        let id = lease.process_id();
        pool.release(lease).await;
        id
    }

    #[tokio::test]
    async fn relaunches_after_max_uses() {
        let (engine, pool) = pool(3);
        for _ in 0..3 {
            render_once(&pool).await;
        }
        assert_eq!(engine.launch_count(), 1);

        let handle = pool.acquire().await.unwrap();
        assert_eq!(handle.use_count(), 1);
        assert_eq!(handle.generation(), 2);
        let processes = engine.processes();
        assert_eq!(processes.len(), 2);
        assert!(processes[0].is_closed());
        assert!(!processes[1].is_closed());
        let lease = pool.open_page(handle).await.unwrap();
        pool.release(lease).await;
    }

    #[tokio::test]
    async fn release_closes_page_not_process() {
        let (engine, pool) = pool(50);
        let first = render_once(&pool).await;
        let second = render_once(&pool).await;

        assert_eq!(first, second);
        assert_eq!(engine.processes().len(), 1);
        assert!(!engine.processes()[0].is_closed());
        assert!(engine.pages().iter().all(|page| page.is_closed()));
        assert_eq!(pool.stats().await.open_pages, 0);
    }

    #[tokio::test]
    async fn disconnect_triggers_relaunch() {
        let (engine, pool) = pool(50);
        render_once(&pool).await;
        engine.processes()[0].disconnect();

        let handle = pool.acquire().await.unwrap();
        assert_eq!(handle.use_count(), 1);
        assert_eq!(engine.launch_count(), 2);
        let lease = pool.open_page(handle).await.unwrap();
        pool.release(lease).await;
    }

    #[tokio::test]
    async fn drain_is_idempotent() {
        let (engine, pool) = pool(50);
        let handle = pool.acquire().await.unwrap();
        let lease = pool.open_page(handle).await.unwrap();

        pool.drain().await;
        assert!(lease.page().is_closed());
        assert!(engine.processes()[0].is_closed());
        let empty = pool.stats().await;
        assert_eq!((empty.generation, empty.open_pages, empty.connected), (0, 0, false));

        pool.drain().await;
        assert_eq!(pool.stats().await, empty);

        // A lease outliving the drain can still be handed back.
        pool.release(lease).await;
        assert_eq!(engine.processes()[0].close_calls(), 1);
    }

    #[tokio::test]
    async fn retired_process_outlives_its_open_pages() {
        let (engine, pool) = pool(1);
        let first = pool.acquire().await.unwrap();
        let in_flight = pool.open_page(first).await.unwrap();

        // Second acquisition exceeds the threshold while a page is still open.
        let second = pool.acquire().await.unwrap();
        assert_eq!(second.generation(), 2);
        assert!(!engine.processes()[0].is_closed());
        assert_eq!(pool.stats().await.retiring, 1);

        pool.release(in_flight).await;
        assert!(engine.processes()[0].is_closed());
        assert_eq!(pool.stats().await.retiring, 0);

        let lease = pool.open_page(second).await.unwrap();
        pool.release(lease).await;
        assert!(!engine.processes()[1].is_closed());
    }

    #[tokio::test]
    async fn closed_pool_refuses_new_checkouts() {
        let (engine, pool) = pool(50);
        render_once(&pool).await;

        pool.close().await;
        assert!(engine.processes()[0].is_closed());
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, RenderError::ShuttingDown));
        assert_eq!(engine.launch_count(), 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn acquire_without_readiness_is_refused() {
        let engine = MockEngine::new();
        let pool = RendererPool::new(engine.clone(), Arc::new(Readiness::new()));

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, RenderError::Interrupted(_)));
        assert_eq!(engine.launch_count(), 0);
    }

    #[tokio::test]
    async fn failed_launch_revokes_readiness() {
        let (engine, pool) = pool(50);
        engine.fail_launches(true);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, RenderError::Launch { .. }));
        assert!(!pool.readiness().is_ready());
    }

    #[tokio::test]
    async fn stale_invalidation_keeps_fresh_process() {
        let (engine, pool) = pool(50);
        render_once(&pool).await;
        engine.processes()[0].disconnect();
        render_once(&pool).await;

        pool.invalidate_generation(1).await;
        assert!(pool.readiness().is_ready());
        assert!(!engine.processes()[1].is_closed());

        pool.invalidate().await;
        assert!(!pool.readiness().is_ready());
        assert!(engine.processes()[1].is_closed());
    }

    #[tokio::test]
    async fn concurrent_acquires_launch_once() {
        let (engine, pool) = pool(50);
        engine.set_launch_delay(Duration::from_millis(30));
        let pool = Arc::new(pool);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { render_once(&pool).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(engine.launch_count(), 1);
        assert_eq!(pool.stats().await.use_count, 8);
    }
}
