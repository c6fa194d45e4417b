//! Shutdown wiring.
//!
//! On an interrupt or terminate signal the renderer pool must be drained
//! before the process exits. [`LifecycleHooks`] races the application's work
//! against the signal and bounds the drain by a grace period, so cleanup can
//! never hold up exit indefinitely.

use std::future::Future;
use std::time::Duration;

use quire_core::{RendererEngine, deadline};
use quire_pool::RendererPool;
use tracing::{info, warn};

/// Something that releases renderer resources on shutdown.
pub trait Drain: Send + Sync {
    /// Closes every page and process. Must be safe to call more than once.
    fn drain(&self) -> impl Future<Output = ()> + Send;
}

impl<E: RendererEngine> Drain for RendererPool<E> {
    async fn drain(&self) {
        Self::drain(self).await;
    }
}

/// Signal that ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ctrl-C / SIGINT.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

/// How a shutdown drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Everything was released within the grace period.
    Drained,
    /// The grace period ran out first.
    TimedOut,
}

/// Drains renderer resources when the application is told to stop.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleHooks {
    grace: Duration,
}

impl Default for LifecycleHooks {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl LifecycleHooks {
    /// Hooks that give the drain at most `grace`.
    #[must_use]
    pub const fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Grace period for the drain.
    #[must_use]
    pub const fn grace(&self) -> Duration {
        self.grace
    }

    /// Drains `target` within the grace period.
    pub async fn shutdown(&self, target: &impl Drain) -> ShutdownOutcome {
        info!(grace = ?self.grace, "draining renderer resources");
        if deadline(self.grace, target.drain()).await.is_some() {
            ShutdownOutcome::Drained
        } else {
            warn!(grace = ?self.grace, "renderer drain did not finish in time");
            ShutdownOutcome::TimedOut
        }
    }

    /// Runs `work` until it finishes or a shutdown signal arrives.
    ///
    /// On a signal, `target` is drained within the grace period and
    /// `Err(signal)` is returned; the caller should exit right after. When
    /// signal handlers cannot be installed, `work` runs unguarded.
    ///
    /// # Errors
    ///
    /// Returns the signal that interrupted `work`.
    pub async fn run_until_signal<T>(
        &self,
        target: &impl Drain,
        work: impl Future<Output = T>,
    ) -> Result<T, Signal> {
        let guarded = futures_lite::future::or(async { Ok(work.await) }, async {
            match shutdown_signal().await {
                Ok(signal) => Err(signal),
                Err(error) => {
                    warn!(%error, "could not install signal handlers");
                    futures_lite::future::pending().await
                }
            }
        });

        let outcome = guarded.await;
        if let Err(signal) = outcome {
            info!(?signal, "shutdown signal received");
            self.shutdown(target).await;
        }
        outcome
    }
}

/// Waits for Ctrl-C, or SIGTERM on Unix.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub async fn shutdown_signal() -> std::io::Result<Signal> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        let interrupt = async {
            tokio::signal::ctrl_c().await?;
            Ok::<_, std::io::Error>(Signal::Interrupt)
        };
        let terminate = async {
            terminate.recv().await;
            Ok::<_, std::io::Error>(Signal::Terminate)
        };
        futures_lite::future::or(interrupt, terminate).await
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(Signal::Interrupt)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counted {
        calls: AtomicUsize,
        hang: bool,
    }

    impl Drain for Counted {
        async fn drain(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                futures_lite::future::pending::<()>().await;
            }
        }
    }

    #[tokio::test]
    async fn quick_drain_finishes() {
        let target = Counted {
            calls: AtomicUsize::new(0),
            hang: false,
        };
        let hooks = LifecycleHooks::new(Duration::from_secs(1));
        assert_eq!(hooks.shutdown(&target).await, ShutdownOutcome::Drained);
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stuck_drain_is_abandoned_after_grace() {
        let target = Counted {
            calls: AtomicUsize::new(0),
            hang: true,
        };
        let hooks = LifecycleHooks::new(Duration::from_millis(30));
        let started = std::time::Instant::now();
        assert_eq!(hooks.shutdown(&target).await, ShutdownOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn finished_work_skips_drain() {
        let target = Counted {
            calls: AtomicUsize::new(0),
            hang: false,
        };
        let hooks = LifecycleHooks::default();
        let value = hooks.run_until_signal(&target, async { 7 }).await;
        assert_eq!(value, Ok(7));
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    }
}
