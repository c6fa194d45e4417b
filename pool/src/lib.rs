//! Shared renderer process management.
//!
//! - [`RendererPool`] owns the single long-lived renderer process, hands out
//!   isolated pages and replaces the process after a use-count threshold or a
//!   disconnect.
//! - [`AcquisitionCoordinator`] turns any number of concurrent "make the
//!   renderer ready" calls into one discovery run.
//! - [`Readiness`] is the state both of them share: which executable is
//!   adopted, if any.
//!
//! The pool is an ordinary value. Build one, wrap it in an `Arc` and hand it
//! to whatever renders:
//!
//! ```rust,ignore
//! let readiness = Arc::new(Readiness::new());
//! let coordinator = AcquisitionCoordinator::new(locator, readiness.clone());
//! let pool = RendererPool::from_config(engine, readiness, &config);
//!
//! coordinator.ensure_ready().await?;
//! let lease = pool.open_page(pool.acquire().await?).await?;
//! // ... load and print ...
//! pool.release(lease).await;
//! ```

mod coordinator;
mod pool;
mod readiness;

pub use coordinator::AcquisitionCoordinator;
pub use pool::{DEFAULT_MAX_USES, PageLease, PoolStats, RendererHandle, RendererPool};
pub use readiness::Readiness;
