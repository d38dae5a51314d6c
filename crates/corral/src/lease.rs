//! RAII lease over a pooled resource

use std::ops::{Deref, DerefMut};

use crate::factory::ResourceFactory;
use crate::scheduler::Scheduler;
use crate::slot::SlotId;

/// What a caller reports about the resource at release time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    /// The resource behaved; return it to the pool.
    #[default]
    Ok,
    /// The resource misbehaved; retire it instead of re-pooling.
    Broken,
}

/// A caller's temporary, exclusive borrow of a pooled resource.
///
/// Release explicitly with [`Lease::release`] to report an [`Outcome`], or
/// just drop the lease; the drop impl spawns the regular `Ok` return.
#[must_use = "a lease returns its resource to the pool when released or dropped"]
pub struct Lease<F: ResourceFactory> {
    slot_id: SlotId,
    resource: Option<F::Resource>,
    scheduler: Scheduler<F>,
}

impl<F: ResourceFactory> Lease<F> {
    pub(crate) fn new(slot_id: SlotId, resource: F::Resource, scheduler: Scheduler<F>) -> Self {
        Self {
            slot_id,
            resource: Some(resource),
            scheduler,
        }
    }

    /// The slot this lease borrows.
    #[must_use]
    pub fn slot_id(&self) -> SlotId {
        self.slot_id
    }

    /// Return the resource to the pool, reporting `outcome`.
    ///
    /// `Outcome::Broken` retires the slot instead of re-pooling it.
    pub async fn release(mut self, outcome: Outcome) {
        if let Some(resource) = self.resource.take() {
            self.scheduler.release(self.slot_id, resource, outcome).await;
        }
    }
}

impl<F: ResourceFactory> Deref for Lease<F> {
    type Target = F::Resource;

    fn deref(&self) -> &F::Resource {
        self.resource.as_ref().expect("lease used after release")
    }
}

impl<F: ResourceFactory> DerefMut for Lease<F> {
    fn deref_mut(&mut self) -> &mut F::Resource {
        self.resource.as_mut().expect("lease used after release")
    }
}

impl<F: ResourceFactory> Drop for Lease<F> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            let scheduler = self.scheduler.clone();
            let slot_id = self.slot_id;
            drop(tokio::spawn(async move {
                scheduler.release(slot_id, resource, Outcome::Ok).await;
            }));
        }
    }
}

impl<F: ResourceFactory> std::fmt::Debug for Lease<F>
where
    F::Resource: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("slot_id", &self.slot_id)
            .field("resource", &self.resource)
            .finish()
    }
}
