//! Pool facade

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::factory::ResourceFactory;
use crate::lease::Lease;
use crate::maintenance;
use crate::scheduler::Scheduler;

/// Snapshot of pool state and lifetime counters.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Slots parked idle, ready to lease.
    pub idle: usize,
    /// Slots out with callers.
    pub in_use: usize,
    /// Slots marked for retirement but still held by a caller.
    pub retiring: usize,
    /// Acquisitions currently parked waiting.
    pub waiters: usize,
    /// Creations in flight (capacity reserved, factory running).
    pub pending_creates: usize,
    /// Maximum pool size.
    pub max_size: usize,
    /// Total resources ever created.
    pub total_created: u64,
    /// Total resources ever destroyed.
    pub total_destroyed: u64,
    /// Total successful acquisitions.
    pub total_acquisitions: u64,
    /// Total releases back to the pool.
    pub total_releases: u64,
    /// Total acquisitions that timed out.
    pub total_timeouts: u64,
    /// Total acquisitions that were cancelled.
    pub total_cancellations: u64,
}

struct PoolInner<F: ResourceFactory> {
    scheduler: Scheduler<F>,
    shutdown: CancellationToken,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Bounded, cancellation-safe pool of reusable resources.
///
/// Cloning is cheap and shares the same pool.
pub struct Pool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> Pool<F> {
    /// Create a new pool around `factory`.
    ///
    /// Spawns the background maintenance task, whose first tick fills the
    /// pool toward `min_idle`; construction itself never calls the factory.
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    /// Returns an error if `config` is invalid.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let scheduler = Scheduler::new(factory, config);
        let shutdown = CancellationToken::new();
        let handle = maintenance::spawn(scheduler.clone(), shutdown.clone());
        Ok(Self {
            inner: Arc::new(PoolInner {
                scheduler,
                shutdown,
                maintenance: Mutex::new(Some(handle)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Acquire a resource, waiting up to the configured `acquire_timeout`.
    ///
    /// Returns exactly one of: a [`Lease`], [`Error::Creation`],
    /// [`Error::Timeout`], [`Error::Cancelled`] (the context's token fired
    /// mid-wait), or [`Error::Closed`].
    pub async fn acquire(&self, ctx: &Context) -> Result<Lease<F>> {
        let timeout = self.inner.scheduler.config.acquire_timeout;
        self.acquire_with_timeout(ctx, timeout).await
    }

    /// Acquire a resource with an explicit timeout.
    pub async fn acquire_with_timeout(&self, ctx: &Context, timeout: Duration) -> Result<Lease<F>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed {
                pool: self.name().to_string(),
            });
        }
        self.inner.scheduler.acquire(ctx, timeout).await
    }

    /// Name of the pool, taken from the factory.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.scheduler.factory.name()
    }

    /// The pool's configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.scheduler.config
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let snapshot = self.inner.scheduler.registry.snapshot();
        PoolStats {
            idle: snapshot.idle,
            in_use: snapshot.in_use,
            retiring: snapshot.retiring,
            waiters: snapshot.waiters,
            pending_creates: snapshot.reserved,
            max_size: self.inner.scheduler.config.max_size,
            total_created: snapshot.counters.created,
            total_destroyed: snapshot.counters.destroyed,
            total_acquisitions: snapshot.counters.acquisitions,
            total_releases: snapshot.counters.releases,
            total_timeouts: snapshot.counters.timeouts,
            total_cancellations: snapshot.counters.cancellations,
        }
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the pool. Idempotent.
    ///
    /// Stops the maintenance task, fails every queued waiter with
    /// [`Error::Closed`], destroys idle resources, and marks in-use slots
    /// for retirement; they are destroyed when their leases release, never
    /// closed out from under a caller.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(pool = self.name(), "closing pool");
        self.inner.shutdown.cancel();
        let handle = self.inner.maintenance.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        for (slot_id, resource) in self.inner.scheduler.registry.close() {
            self.inner.scheduler.destroy(slot_id, resource).await;
        }
    }
}

impl<F: ResourceFactory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name())
            .field("stats", &self.stats())
            .finish()
    }
}
