//! Acquisition scheduling: the waiting protocol behind `acquire`
//!
//! One pass of the ladder (idle slot → new admission → queue) is a single
//! atomic registry claim, so a release can never slip between "nothing idle"
//! and "parked waiting". A queued caller then races its grant channel against
//! its cancellation token and its deadline; losing the race drops the
//! receiver, and any grant already in flight unwinds itself back into the
//! registry (see `registry.rs`).

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::factory::ResourceFactory;
use crate::lease::{Lease, Outcome};
use crate::registry::{Admission, CheckedOut, Claim, Disposition, Grant, Registry};
use crate::slot::SlotId;

pub(crate) struct Scheduler<F: ResourceFactory> {
    pub(crate) registry: Registry<F::Resource>,
    pub(crate) factory: Arc<F>,
    pub(crate) config: PoolConfig,
}

impl<F: ResourceFactory> Clone for Scheduler<F> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            factory: Arc::clone(&self.factory),
            config: self.config.clone(),
        }
    }
}

impl<F: ResourceFactory> Scheduler<F> {
    pub(crate) fn new(factory: F, config: PoolConfig) -> Self {
        Self {
            registry: Registry::new(config.clone()),
            factory: Arc::new(factory),
            config,
        }
    }

    /// Acquire a resource within `timeout`, honoring `ctx.cancellation`.
    pub(crate) async fn acquire(&self, ctx: &Context, timeout: Duration) -> Result<Lease<F>> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        if ctx.cancellation.is_cancelled() {
            return Err(self.cancelled_error(started));
        }
        let mut attempted = false;
        loop {
            self.sweep_doomed().await;
            if attempted && tokio::time::Instant::now() >= deadline {
                return Err(self.timeout_error(started));
            }
            attempted = true;
            match self.registry.claim() {
                Claim::Closed => return Err(self.closed_error()),
                Claim::Checkout(checked_out) => {
                    if let Some(lease) = self.vet(checked_out, ctx).await {
                        return Ok(lease);
                    }
                    // invalid resource destroyed; run the ladder again
                }
                Claim::Admission(admission) => return self.admit(admission, ctx).await,
                Claim::Queued(waiter_id, mut receiver) => {
                    tokio::select! {
                        granted = &mut receiver => match granted {
                            Ok(Grant::Slot(checked_out)) => {
                                if let Some(lease) = self.vet(checked_out, ctx).await {
                                    return Ok(lease);
                                }
                                // granted slot failed liveness; re-enter the queue
                            }
                            Ok(Grant::Admission(admission)) => {
                                return self.admit(admission, ctx).await;
                            }
                            // The registry dropped our sender: pool closed.
                            Err(_) => return Err(self.closed_error()),
                        },
                        () = ctx.cancellation.cancelled() => {
                            self.registry.deregister_waiter(waiter_id);
                            // An in-flight grant unwinds itself when the
                            // receiver drops; the slot it carried is back in
                            // the pool before this error is constructed.
                            drop(receiver);
                            return Err(self.cancelled_error(started));
                        }
                        () = tokio::time::sleep_until(deadline) => {
                            self.registry.deregister_waiter(waiter_id);
                            drop(receiver);
                            return Err(self.timeout_error(started));
                        }
                    }
                }
            }
        }
    }

    /// Return a leased resource to the pool.
    pub(crate) async fn release(&self, slot_id: SlotId, resource: F::Resource, outcome: Outcome) {
        let broken = matches!(outcome, Outcome::Broken);
        match self.registry.release(slot_id, resource, broken) {
            Disposition::Parked => {}
            Disposition::Destroy(resource) => {
                tracing::debug!(pool = self.factory.name(), slot = %slot_id, broken, "destroying retired resource");
                self.destroy(slot_id, resource).await;
            }
        }
        self.sweep_doomed().await;
    }

    /// Destroy resources whose slots were retired in a sync context.
    pub(crate) async fn sweep_doomed(&self) {
        for (slot_id, resource) in self.registry.take_doomed() {
            self.destroy(slot_id, resource).await;
        }
    }

    /// Best-effort destroy; failures are logged and swallowed.
    pub(crate) async fn destroy(&self, slot_id: SlotId, resource: F::Resource) {
        if let Err(error) = self.factory.destroy(resource).await {
            tracing::warn!(pool = self.factory.name(), slot = %slot_id, %error, "resource destroy failed");
        }
    }

    /// Bounded validation run; an error or a timeout counts as dead.
    pub(crate) async fn validate(&self, resource: &mut F::Resource) -> bool {
        let verdict =
            tokio::time::timeout(self.config.validation_timeout, self.factory.validate(resource))
                .await;
        matches!(verdict, Ok(Ok(true)))
    }

    /// Liveness-check a checked-out slot and turn it into a lease; on
    /// failure, destroy the resource and report `None` so the caller can
    /// re-enter the ladder.
    async fn vet(&self, mut checked_out: CheckedOut<F::Resource>, ctx: &Context) -> Option<Lease<F>> {
        if checked_out.is_stale() {
            if !self.validate(checked_out.resource_mut()).await {
                let slot_id = checked_out.slot_id();
                tracing::debug!(pool = self.factory.name(), slot = %slot_id, "idle resource failed validation, retiring");
                let resource = checked_out.discard();
                self.destroy(slot_id, resource).await;
                return None;
            }
            checked_out.mark_validated();
        }
        let (slot_id, resource) = checked_out.into_lease_parts(&ctx.caller);
        Some(Lease::new(slot_id, resource, self.clone()))
    }

    /// Create a resource against a held reservation. Creation failures
    /// surface immediately: a broken resource source fails fast rather than
    /// silently burning the caller's timeout budget.
    async fn admit(&self, admission: Admission<F::Resource>, ctx: &Context) -> Result<Lease<F>> {
        match self.factory.create(ctx).await {
            Ok(resource) => {
                let slot_id = admission.commit_in_use(&ctx.caller);
                tracing::debug!(pool = self.factory.name(), slot = %slot_id, caller = %ctx.caller, "created resource");
                Ok(Lease::new(slot_id, resource, self.clone()))
            }
            Err(error) => {
                tracing::warn!(pool = self.factory.name(), %error, "resource creation failed");
                // Dropping the reservation offers the capacity onward.
                drop(admission);
                Err(error)
            }
        }
    }

    fn timeout_error(&self, started: Instant) -> Error {
        self.registry.note_timeout();
        let snapshot = self.registry.snapshot();
        Error::Timeout {
            pool: self.factory.name().to_string(),
            waited: started.elapsed(),
            in_use: snapshot.in_use,
            max_size: self.config.max_size,
        }
    }

    fn cancelled_error(&self, started: Instant) -> Error {
        self.registry.note_cancelled();
        Error::Cancelled {
            pool: self.factory.name().to_string(),
            waited: started.elapsed(),
        }
    }

    fn closed_error(&self) -> Error {
        Error::Closed {
            pool: self.factory.name().to_string(),
        }
    }
}
