//! Background maintenance loop
//!
//! A single task per pool, spawned at construction and stopped by the pool's
//! shutdown token. Each tick retires expired slots, keepalive-validates idle
//! resources, and tops the pool back up to its minimum-idle target. Nothing
//! here is fatal and nothing here blocks `acquire`: factory calls run
//! outside the registry lock, and per-tick failures are logged and retried.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::factory::ResourceFactory;
use crate::lease::Outcome;
use crate::scheduler::Scheduler;

/// Creation backoff across ticks: doubles per consecutive failure, capped at
/// eight periods.
struct Backoff {
    failures: u32,
    resume_at: tokio::time::Instant,
}

impl Backoff {
    fn new() -> Self {
        Self {
            failures: 0,
            resume_at: tokio::time::Instant::now(),
        }
    }

    fn ready(&self) -> bool {
        tokio::time::Instant::now() >= self.resume_at
    }

    fn succeed(&mut self) {
        self.failures = 0;
        self.resume_at = tokio::time::Instant::now();
    }

    fn fail(&mut self, period: Duration) {
        self.failures = (self.failures + 1).min(3);
        self.resume_at = tokio::time::Instant::now() + period * 2u32.pow(self.failures);
    }
}

pub(crate) fn spawn<F: ResourceFactory>(
    scheduler: Scheduler<F>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(scheduler.config.maintenance_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut backoff = Backoff::new();
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = shutdown.cancelled() => break,
            }
            retire_expired(&scheduler).await;
            run_keepalive(&scheduler).await;
            top_up(&scheduler, &mut backoff).await;
        }
    })
}

/// Destroy slots past their idle timeout or maximum lifetime, and mark
/// in-use slots past their lifetime for retirement on release.
async fn retire_expired<F: ResourceFactory>(scheduler: &Scheduler<F>) {
    for (slot_id, resource) in scheduler.registry.collect_retirable() {
        tracing::debug!(pool = scheduler.factory.name(), slot = %slot_id, "retiring expired resource");
        scheduler.destroy(slot_id, resource).await;
    }
}

/// Re-validate idle resources whose last validation is older than the
/// keepalive interval.
///
/// One due slot at a time: each take re-checks under the lock, and a slot
/// that passes is no longer due, so the loop terminates.
async fn run_keepalive<F: ResourceFactory>(scheduler: &Scheduler<F>) {
    while let Some(mut checked_out) = scheduler.registry.take_validation_due("keepalive") {
        let slot_id = checked_out.slot_id();
        if scheduler.config.isolate_internal_ops {
            // Run the check as a regular lease so the touch is
            // indistinguishable from caller use.
            let (slot_id, mut resource) = checked_out.into_lease_parts("keepalive");
            let alive = scheduler.validate(&mut resource).await;
            if alive {
                scheduler.registry.note_validated(slot_id);
            } else {
                tracing::debug!(pool = scheduler.factory.name(), slot = %slot_id, "keepalive validation failed, retiring");
            }
            let outcome = if alive { Outcome::Ok } else { Outcome::Broken };
            scheduler.release(slot_id, resource, outcome).await;
        } else if scheduler.validate(checked_out.resource_mut()).await {
            // Dropping the checkout parks the slot back idle without
            // counting as use.
            checked_out.mark_validated();
        } else {
            tracing::debug!(pool = scheduler.factory.name(), slot = %slot_id, "keepalive validation failed, retiring");
            let resource = checked_out.discard();
            scheduler.destroy(slot_id, resource).await;
        }
    }
}

/// Create resources until the pool is back at its minimum-idle target,
/// backing off across ticks while the factory is failing.
async fn top_up<F: ResourceFactory>(scheduler: &Scheduler<F>, backoff: &mut Backoff) {
    if !backoff.ready() {
        return;
    }
    let ctx = Context::new("maintenance");
    while scheduler.registry.shortfall() > 0 {
        let Some(admission) = scheduler.registry.try_admit() else {
            break;
        };
        match scheduler.factory.create(&ctx).await {
            Ok(resource) => {
                admission.commit_idle(resource);
                backoff.succeed();
            }
            Err(error) => {
                backoff.fail(scheduler.config.maintenance_interval);
                tracing::warn!(
                    pool = scheduler.factory.name(),
                    %error,
                    consecutive_failures = backoff.failures,
                    "background resource creation failed, backing off"
                );
                break;
            }
        }
    }
}
