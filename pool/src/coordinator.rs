//! Single-flight renderer acquisition.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_lock::OnceCell;
use quire_core::{
    Discover, Failure, ProgressSink, RenderError, RendererCandidate, Result, Stage,
};
use tracing::{debug, info, warn};

use crate::readiness::Readiness;

/// The shared outcome of one in-flight discovery.
#[derive(Debug, Default)]
struct Ticket {
    outcome: OnceCell<Result<RendererCandidate>>,
}

/// Deduplicates concurrent "make the renderer ready" requests.
///
/// While not ready, the first caller becomes the leader and runs discovery;
/// everyone arriving before it finishes waits on the same ticket and sees the
/// same result. Once the ticket resolves the slot is cleared, so a failed
/// attempt can be retried by the next call.
pub struct AcquisitionCoordinator {
    discover: Box<dyn Discover>,
    readiness: Arc<Readiness>,
    progress: ProgressSink,
    in_flight: Mutex<Option<Arc<Ticket>>>,
    discoveries: AtomicUsize,
}

impl std::fmt::Debug for AcquisitionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionCoordinator")
            .field("readiness", &self.readiness)
            .field("discoveries", &self.discoveries)
            .finish_non_exhaustive()
    }
}

impl AcquisitionCoordinator {
    /// Creates a coordinator that runs `discover` and records the result in `readiness`.
    #[must_use]
    pub fn new(discover: impl Discover, readiness: Arc<Readiness>) -> Self {
        Self {
            discover: Box::new(discover),
            readiness,
            progress: ProgressSink::new(),
            in_flight: Mutex::new(None),
            discoveries: AtomicUsize::new(0),
        }
    }

    /// Reports stage changes to `progress` instead of a private sink.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Sink receiving stage changes.
    #[must_use]
    pub const fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    /// Shared readiness state.
    #[must_use]
    pub const fn readiness(&self) -> &Arc<Readiness> {
        &self.readiness
    }

    /// Number of discovery runs started so far.
    #[must_use]
    pub fn discovery_count(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }

    /// Makes sure a verified renderer is adopted.
    ///
    /// Returns immediately when already ready. Otherwise joins the in-flight
    /// ticket or starts one.
    ///
    /// # Errors
    ///
    /// Returns the discovery error; every caller waiting on the same ticket
    /// receives a clone of it.
    pub async fn ensure_ready(&self) -> Result<RendererCandidate> {
        if let Some(candidate) = self.readiness.current() {
            return Ok(candidate);
        }

        let ticket = match self.claim() {
            Claim::Ready(candidate) => return Ok(candidate),
            Claim::Waiter(ticket) => {
                debug!("joining in-flight renderer acquisition");
                return ticket.outcome.wait().await.clone();
            }
            Claim::Leader(ticket) => ticket,
        };

        let mut guard = LeaderGuard {
            coordinator: self,
            ticket: &ticket,
            finished: false,
        };
        let outcome = self.run_discovery().await;
        if ticket.outcome.set(outcome.clone()).await.is_err() {
            warn!("acquisition ticket resolved twice");
        }
        guard.finish();
        outcome
    }

    /// Marks the renderer not-ready; the next call runs discovery again.
    pub fn invalidate(&self) {
        self.readiness.revoke();
    }

    async fn run_discovery(&self) -> Result<RendererCandidate> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        self.progress.emit(Stage::Checking);

        match self.discover.discover(&self.progress).await {
            Ok(candidate) => {
                info!(
                    source = %candidate.source,
                    path = %candidate.path.display(),
                    "renderer ready"
                );
                self.readiness.mark_ready(candidate.clone());
                self.progress.emit(Stage::Ready {
                    path: candidate.path.clone(),
                });
                Ok(candidate)
            }
            Err(error) => {
                warn!(%error, "renderer acquisition failed");
                self.progress.emit(Stage::Error {
                    failure: Failure::from(&error),
                });
                Err(error)
            }
        }
    }

    fn claim(&self) -> Claim {
        let mut slot = self.slot();
        // The previous leader marks ready before clearing the slot.
        if let Some(candidate) = self.readiness.current() {
            return Claim::Ready(candidate);
        }
        if let Some(ticket) = slot.as_ref() {
            return Claim::Waiter(ticket.clone());
        }
        let ticket = Arc::new(Ticket::default());
        *slot = Some(ticket.clone());
        Claim::Leader(ticket)
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<Ticket>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Claim {
    Ready(RendererCandidate),
    Waiter(Arc<Ticket>),
    Leader(Arc<Ticket>),
}

/// Clears the ticket slot when the leader finishes, and resolves the ticket
/// for waiters if the leader is dropped mid-discovery.
struct LeaderGuard<'a> {
    coordinator: &'a AcquisitionCoordinator,
    ticket: &'a Arc<Ticket>,
    finished: bool,
}

impl LeaderGuard<'_> {
    fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("renderer acquisition was cancelled");
            let interrupted = Err(RenderError::Interrupted(
                "renderer acquisition was cancelled".to_string(),
            ));
            let _ = self.ticket.outcome.set_blocking(interrupted);
        }
        let mut slot = self.coordinator.slot();
        if slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, self.ticket))
        {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use quire_core::{AttemptTrace, BoxFuture, SourceKind};

    /// Discovery that sleeps, then succeeds or fails, counting its runs.
    #[derive(Clone)]
    struct SlowDiscover {
        runs: Arc<AtomicUsize>,
        delay: Duration,
        fail: bool,
    }

    impl SlowDiscover {
        fn new(delay: Duration, fail: bool) -> Self {
            Self {
                runs: Arc::default(),
                delay,
                fail,
            }
        }
    }

    impl Discover for SlowDiscover {
        fn discover<'a>(
            &'a self,
            progress: &'a ProgressSink,
        ) -> BoxFuture<'a, Result<RendererCandidate>> {
            Box::pin(async move {
                self.runs.fetch_add(1, Ordering::SeqCst);
                progress.emit(Stage::Locating {
                    source: SourceKind::Bundled,
                });
                tokio::time::sleep(self.delay).await;
                if self.fail {
                    Err(RenderError::DiscoveryExhausted {
                        attempts: Vec::<AttemptTrace>::new(),
                    })
                } else {
                    Ok(RendererCandidate::new(SourceKind::Bundled, "/opt/chrome").verified())
                }
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_discovery() {
        let discover = SlowDiscover::new(Duration::from_millis(50), false);
        let runs = discover.runs.clone();
        let coordinator = Arc::new(AcquisitionCoordinator::new(
            discover,
            Arc::new(Readiness::new()),
        ));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.ensure_ready().await })
            })
            .collect();
        for task in tasks {
            let candidate = task.await.unwrap().unwrap();
            assert_eq!(candidate.source, SourceKind::Bundled);
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.discovery_count(), 1);
        assert!(coordinator.readiness().is_ready());
    }

    #[tokio::test]
    async fn failure_is_shared_then_retried() {
        let discover = SlowDiscover::new(Duration::from_millis(20), true);
        let runs = discover.runs.clone();
        let coordinator = AcquisitionCoordinator::new(discover, Arc::new(Readiness::new()));

        let (a, b) =
            futures_lite::future::zip(coordinator.ensure_ready(), coordinator.ensure_ready())
                .await;
        assert!(matches!(a, Err(RenderError::DiscoveryExhausted { .. })));
        assert!(matches!(b, Err(RenderError::DiscoveryExhausted { .. })));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // The slot was cleared, so the next call starts a fresh attempt.
        let _ = coordinator.ensure_ready().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ready_state_skips_discovery_until_invalidated() {
        let discover = SlowDiscover::new(Duration::from_millis(1), false);
        let runs = discover.runs.clone();
        let coordinator = AcquisitionCoordinator::new(discover, Arc::new(Readiness::new()));

        coordinator.ensure_ready().await.unwrap();
        coordinator.ensure_ready().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        coordinator.invalidate();
        coordinator.ensure_ready().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stages_are_reported_in_order() {
        let coordinator = AcquisitionCoordinator::new(
            SlowDiscover::new(Duration::from_millis(1), false),
            Arc::new(Readiness::new()),
        );
        let events = coordinator.progress().subscribe();

        coordinator.ensure_ready().await.unwrap();

        let mut stages = Vec::new();
        while let Ok(stage) = events.try_recv() {
            stages.push(stage);
        }
        assert_eq!(
            stages,
            vec![
                Stage::Checking,
                Stage::Locating {
                    source: SourceKind::Bundled
                },
                Stage::Ready {
                    path: "/opt/chrome".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_leader_releases_waiters() {
        let coordinator = Arc::new(AcquisitionCoordinator::new(
            SlowDiscover::new(Duration::from_secs(30), false),
            Arc::new(Readiness::new()),
        ));

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.ensure_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.ensure_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        let outcome = waiter.await.unwrap();
        assert!(matches!(outcome, Err(RenderError::Interrupted(_))));
        assert_eq!(coordinator.discovery_count(), 1);
    }
}
