//! Slot registry: the single source of truth for pool state
//!
//! Every slot-state transition, the waiter queue, and capacity reservations
//! live behind one mutex. Registry operations never call the factory and
//! never await: resource creation and destruction always happen outside the
//! lock, with capacity reserved beforehand (`Admission`) and committed or
//! rolled back after.
//!
//! Waiters are satisfied by direct handoff: a release or a freed reservation
//! sends a [`Grant`] over the waiter's oneshot channel. Both grant payloads
//! are RAII guards: a grant that is never redeemed (its receiver was
//! cancelled or timed out in the same instant) unwinds itself back into the
//! registry, so a slot can never end up owned by nobody.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::PoolConfig;
use crate::slot::{Slot, SlotId, SlotState};

/// Lifetime counters, snapshotted into [`PoolStats`](crate::PoolStats).
#[derive(Debug, Clone, Default)]
pub(crate) struct Counters {
    pub(crate) created: u64,
    pub(crate) destroyed: u64,
    pub(crate) acquisitions: u64,
    pub(crate) releases: u64,
    pub(crate) timeouts: u64,
    pub(crate) cancellations: u64,
}

/// Point-in-time view of registry state.
pub(crate) struct Snapshot {
    pub(crate) idle: usize,
    pub(crate) in_use: usize,
    pub(crate) retiring: usize,
    pub(crate) waiters: usize,
    pub(crate) reserved: usize,
    pub(crate) counters: Counters,
}

/// A pending acquisition parked in the registry.
struct Waiter<T> {
    id: u64,
    tx: oneshot::Sender<Grant<T>>,
}

struct Inner<T> {
    slots: HashMap<SlotId, Slot<T>>,
    /// Idle slot ids, most recently parked last (taken LIFO).
    idle: Vec<SlotId>,
    waiters: VecDeque<Waiter<T>>,
    /// Resources removed from the slot table in a sync context, awaiting
    /// destruction at the next async touch point.
    doomed: Vec<(SlotId, T)>,
    /// In-flight admissions: capacity reserved while the factory runs.
    reserved: usize,
    next_slot: u64,
    next_waiter: u64,
    closed: bool,
    counters: Counters,
}

struct Shared<T> {
    config: PoolConfig,
    state: Mutex<Inner<T>>,
}

/// Cheap cloneable handle to the shared registry state.
pub(crate) struct Registry<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Outcome of a claim attempt.
pub(crate) enum Claim<T> {
    /// An idle slot, already marked in-use and bound to the claimant.
    Checkout(CheckedOut<T>),
    /// Capacity reserved; the claimant may create a new resource.
    Admission(Admission<T>),
    /// At capacity with nothing idle; parked until granted.
    Queued(u64, oneshot::Receiver<Grant<T>>),
    /// The pool is closed.
    Closed,
}

/// What a parked waiter is handed.
pub(crate) enum Grant<T> {
    /// A released slot, bound to the waiter.
    Slot(CheckedOut<T>),
    /// A freed reservation, transferring the right to create.
    Admission(Admission<T>),
}

/// What the registry decided about a released resource.
pub(crate) enum Disposition<T> {
    /// Parked idle or handed to a waiter; the registry kept it.
    Parked,
    /// The slot retired; the caller must destroy the resource.
    Destroy(T),
}

/// An in-use slot checked out of the registry whose return is still owed.
///
/// Dropping it unredeemed gives the resource straight back to the registry
/// (or to the next waiter). This is what makes the cancel-versus-satisfy
/// race safe: a cancelled waiter drops its receiver, the channel drops the
/// grant, and the grant re-parks the slot before the cancellation error
/// reaches the caller.
pub(crate) struct CheckedOut<T> {
    registry: Registry<T>,
    slot_id: SlotId,
    resource: Option<T>,
    stale: bool,
}

impl<T> CheckedOut<T> {
    pub(crate) fn slot_id(&self) -> SlotId {
        self.slot_id
    }

    /// Whether the slot went unvalidated past the keepalive interval.
    pub(crate) fn is_stale(&self) -> bool {
        self.stale
    }

    pub(crate) fn resource_mut(&mut self) -> &mut T {
        self.resource
            .as_mut()
            .expect("checked-out resource already consumed")
    }

    pub(crate) fn mark_validated(&self) {
        self.registry.note_validated(self.slot_id);
    }

    /// Hand ownership to a lease, recording the owner and counting the
    /// acquisition.
    pub(crate) fn into_lease_parts(mut self, owner: &str) -> (SlotId, T) {
        let resource = self
            .resource
            .take()
            .expect("checked-out resource already consumed");
        self.registry.note_leased(self.slot_id, owner);
        (self.slot_id, resource)
    }

    /// The resource failed liveness: unregister the slot and hand the
    /// resource back for destruction.
    pub(crate) fn discard(mut self) -> T {
        let resource = self
            .resource
            .take()
            .expect("checked-out resource already consumed");
        self.registry.remove_discarded(self.slot_id);
        resource
    }

    /// Take the resource without any registry action. Only for callers that
    /// already hold the registry lock (a failed handoff send).
    fn defuse(&mut self) -> Option<T> {
        self.resource.take()
    }
}

impl<T> Drop for CheckedOut<T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.registry.give_back(self.slot_id, resource);
        }
    }
}

/// A capacity reservation for one in-flight resource creation.
///
/// Dropping it uncommitted rolls the reservation back and offers the freed
/// capacity to the next waiter.
pub(crate) struct Admission<T> {
    registry: Registry<T>,
    done: bool,
}

impl<T> Admission<T> {
    /// Consume the reservation: register a new in-use slot for a resource
    /// that goes straight out with a lease.
    pub(crate) fn commit_in_use(mut self, owner: &str) -> SlotId {
        self.done = true;
        self.registry.commit_in_use(owner)
    }

    /// Consume the reservation: park a new resource idle (or hand it to a
    /// waiter).
    pub(crate) fn commit_idle(mut self, resource: T) {
        self.done = true;
        self.registry.commit_idle(resource);
    }
}

impl<T> Drop for Admission<T> {
    fn drop(&mut self) {
        if !self.done {
            self.registry.abort_admission();
        }
    }
}

impl<T> Registry<T> {
    pub(crate) fn new(config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(Inner {
                    slots: HashMap::new(),
                    idle: Vec::new(),
                    waiters: VecDeque::new(),
                    doomed: Vec::new(),
                    reserved: 0,
                    next_slot: 0,
                    next_waiter: 0,
                    closed: false,
                    counters: Counters::default(),
                }),
            }),
        }
    }

    /// One atomic pass of the acquisition ladder: idle slot, else admission,
    /// else enqueue. Expired idle slots encountered on the way are doomed.
    pub(crate) fn claim(&self) -> Claim<T> {
        let config = &self.shared.config;
        let mut inner = self.shared.state.lock();
        if inner.closed {
            return Claim::Closed;
        }
        while let Some(slot_id) = inner.idle.pop() {
            let (expired, stale) = match inner.slots.get(&slot_id) {
                Some(slot) => (
                    slot.lifetime_expired(config) || slot.idle_expired(config),
                    slot.validation_due(config),
                ),
                None => continue,
            };
            if expired {
                if let Some(mut slot) = inner.slots.remove(&slot_id) {
                    slot.state = SlotState::Closed;
                    if let Some(resource) = slot.resource.take() {
                        inner.counters.destroyed += 1;
                        inner.doomed.push((slot_id, resource));
                    }
                }
                continue;
            }
            let Some(slot) = inner.slots.get_mut(&slot_id) else {
                continue;
            };
            let Some(resource) = slot.resource.take() else {
                continue;
            };
            slot.state = SlotState::InUse;
            return Claim::Checkout(CheckedOut {
                registry: self.clone(),
                slot_id,
                resource: Some(resource),
                stale,
            });
        }
        if inner.slots.len() + inner.reserved < config.max_size {
            inner.reserved += 1;
            return Claim::Admission(Admission {
                registry: self.clone(),
                done: false,
            });
        }
        let (tx, rx) = oneshot::channel();
        let waiter_id = inner.next_waiter;
        inner.next_waiter += 1;
        inner.waiters.push_back(Waiter { id: waiter_id, tx });
        Claim::Queued(waiter_id, rx)
    }

    /// Remove a waiter that timed out or was cancelled. A grant already in
    /// its channel is not recalled here; dropping the receiver unwinds it.
    pub(crate) fn deregister_waiter(&self, waiter_id: u64) {
        let mut inner = self.shared.state.lock();
        inner.waiters.retain(|waiter| waiter.id != waiter_id);
    }

    /// Return a leased resource. `broken` forces retirement.
    pub(crate) fn release(&self, slot_id: SlotId, resource: T, broken: bool) -> Disposition<T> {
        let mut inner = self.shared.state.lock();
        inner.counters.releases += 1;
        let retiring = match inner.slots.get_mut(&slot_id) {
            Some(slot) => {
                slot.last_used = Instant::now();
                slot.owner = None;
                slot.state == SlotState::Retiring
            }
            None => return Disposition::Destroy(resource),
        };
        if broken || retiring || inner.closed {
            if let Some(mut slot) = inner.slots.remove(&slot_id) {
                slot.state = SlotState::Closed;
            }
            inner.counters.destroyed += 1;
            self.offer_capacity(&mut inner);
            return Disposition::Destroy(resource);
        }
        self.park_or_handoff(&mut inner, slot_id, resource);
        Disposition::Parked
    }

    /// Drain resources whose slots were retired in a sync context.
    pub(crate) fn take_doomed(&self) -> Vec<(SlotId, T)> {
        let mut inner = self.shared.state.lock();
        std::mem::take(&mut inner.doomed)
    }

    /// Close the registry: fail all waiters, drain idle resources for
    /// destruction, and mark in-use slots for retirement on release.
    /// Idempotent; a second call returns nothing.
    pub(crate) fn close(&self) -> Vec<(SlotId, T)> {
        let mut inner = self.shared.state.lock();
        if inner.closed {
            return Vec::new();
        }
        inner.closed = true;
        // Dropping the senders resolves every pending receiver with a
        // closed-channel error.
        inner.waiters.clear();
        let mut drained = std::mem::take(&mut inner.doomed);
        for slot_id in std::mem::take(&mut inner.idle) {
            if let Some(mut slot) = inner.slots.remove(&slot_id) {
                slot.state = SlotState::Closed;
                if let Some(resource) = slot.resource.take() {
                    inner.counters.destroyed += 1;
                    drained.push((slot_id, resource));
                }
            }
        }
        for slot in inner.slots.values_mut() {
            slot.state = SlotState::Retiring;
        }
        drained
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let inner = self.shared.state.lock();
        let mut idle = 0;
        let mut in_use = 0;
        let mut retiring = 0;
        for slot in inner.slots.values() {
            match slot.state {
                SlotState::Idle => idle += 1,
                SlotState::InUse => in_use += 1,
                SlotState::Retiring => retiring += 1,
                SlotState::Closed => {}
            }
        }
        Snapshot {
            idle,
            in_use,
            retiring,
            waiters: inner.waiters.len(),
            reserved: inner.reserved,
            counters: inner.counters.clone(),
        }
    }

    pub(crate) fn note_timeout(&self) {
        self.shared.state.lock().counters.timeouts += 1;
    }

    pub(crate) fn note_cancelled(&self) {
        self.shared.state.lock().counters.cancellations += 1;
    }

    // -- maintenance entry points --------------------------------------------

    /// Collect idle slots due for retirement (idle past `idle_timeout` while
    /// total exceeds `min_idle`, or past `max_lifetime`), mark in-use slots
    /// past `max_lifetime` as retiring, and drain the doomed list. Returned
    /// resources must be destroyed by the caller, outside the lock.
    pub(crate) fn collect_retirable(&self) -> Vec<(SlotId, T)> {
        let config = &self.shared.config;
        let mut inner = self.shared.state.lock();
        let mut retired = std::mem::take(&mut inner.doomed);
        if inner.closed {
            return retired;
        }
        let idle_ids = std::mem::take(&mut inner.idle);
        let mut kept = Vec::with_capacity(idle_ids.len());
        for slot_id in idle_ids {
            let (lifetime, idle_excess) = match inner.slots.get(&slot_id) {
                Some(slot) => (slot.lifetime_expired(config), slot.idle_expired(config)),
                None => continue,
            };
            let total = inner.slots.len() + inner.reserved;
            if lifetime || (idle_excess && total > config.min_idle) {
                if let Some(mut slot) = inner.slots.remove(&slot_id) {
                    slot.state = SlotState::Closed;
                    if let Some(resource) = slot.resource.take() {
                        inner.counters.destroyed += 1;
                        retired.push((slot_id, resource));
                    }
                }
            } else {
                kept.push(slot_id);
            }
        }
        inner.idle = kept;
        for slot in inner.slots.values_mut() {
            if slot.state == SlotState::InUse && slot.lifetime_expired(config) {
                slot.state = SlotState::Retiring;
            }
        }
        retired
    }

    /// Check out one idle slot due for keepalive validation, if any.
    pub(crate) fn take_validation_due(&self, owner: &str) -> Option<CheckedOut<T>> {
        let config = &self.shared.config;
        let mut inner = self.shared.state.lock();
        if inner.closed {
            return None;
        }
        let position = inner.idle.iter().position(|slot_id| {
            inner
                .slots
                .get(slot_id)
                .is_some_and(|slot| slot.validation_due(config))
        })?;
        let slot_id = inner.idle.remove(position);
        let slot = inner.slots.get_mut(&slot_id)?;
        let resource = slot.resource.take()?;
        slot.state = SlotState::InUse;
        slot.owner = Some(owner.to_string());
        Some(CheckedOut {
            registry: self.clone(),
            slot_id,
            resource: Some(resource),
            stale: true,
        })
    }

    /// How many resources below the `min_idle` target the pool currently is.
    pub(crate) fn shortfall(&self) -> usize {
        let inner = self.shared.state.lock();
        if inner.closed {
            return 0;
        }
        let total = inner.slots.len() + inner.reserved;
        self.shared.config.min_idle.saturating_sub(total)
    }

    /// Reserve capacity for a background creation, if any remains.
    pub(crate) fn try_admit(&self) -> Option<Admission<T>> {
        let mut inner = self.shared.state.lock();
        if inner.closed || inner.slots.len() + inner.reserved >= self.shared.config.max_size {
            return None;
        }
        inner.reserved += 1;
        Some(Admission {
            registry: self.clone(),
            done: false,
        })
    }

    pub(crate) fn note_validated(&self, slot_id: SlotId) {
        let mut inner = self.shared.state.lock();
        if let Some(slot) = inner.slots.get_mut(&slot_id) {
            slot.last_validated = Instant::now();
        }
    }

    // -- guard callbacks -----------------------------------------------------

    fn note_leased(&self, slot_id: SlotId, owner: &str) {
        let mut inner = self.shared.state.lock();
        inner.counters.acquisitions += 1;
        if let Some(slot) = inner.slots.get_mut(&slot_id) {
            slot.owner = Some(owner.to_string());
            slot.last_used = Instant::now();
        }
    }

    /// A checked-out slot coming back without having been used (grant
    /// unwind, or keepalive validation with accounting bypassed).
    fn give_back(&self, slot_id: SlotId, resource: T) {
        let mut inner = self.shared.state.lock();
        let retiring = match inner.slots.get(&slot_id) {
            Some(slot) => slot.state == SlotState::Retiring,
            None => true,
        };
        if retiring || inner.closed {
            if let Some(mut slot) = inner.slots.remove(&slot_id) {
                slot.state = SlotState::Closed;
            }
            inner.counters.destroyed += 1;
            inner.doomed.push((slot_id, resource));
            self.offer_capacity(&mut inner);
            return;
        }
        self.park_or_handoff(&mut inner, slot_id, resource);
    }

    /// Unregister a slot whose resource failed liveness.
    fn remove_discarded(&self, slot_id: SlotId) {
        let mut inner = self.shared.state.lock();
        if inner.slots.remove(&slot_id).is_some() {
            inner.counters.destroyed += 1;
        }
        self.offer_capacity(&mut inner);
    }

    fn commit_in_use(&self, owner: &str) -> SlotId {
        let mut inner = self.shared.state.lock();
        inner.reserved -= 1;
        let slot_id = SlotId(inner.next_slot);
        inner.next_slot += 1;
        inner.slots.insert(slot_id, Slot::new_in_use(owner));
        inner.counters.created += 1;
        inner.counters.acquisitions += 1;
        slot_id
    }

    fn commit_idle(&self, resource: T) {
        let mut inner = self.shared.state.lock();
        inner.reserved -= 1;
        inner.counters.created += 1;
        let slot_id = SlotId(inner.next_slot);
        inner.next_slot += 1;
        if inner.closed {
            inner.counters.destroyed += 1;
            inner.doomed.push((slot_id, resource));
            return;
        }
        inner.slots.insert(slot_id, Slot::new_in_use("maintenance"));
        self.park_or_handoff(&mut inner, slot_id, resource);
    }

    fn abort_admission(&self) {
        let mut inner = self.shared.state.lock();
        inner.reserved -= 1;
        self.offer_capacity(&mut inner);
    }

    // -- lock-held helpers ---------------------------------------------------

    /// Hand the resource to the frontmost live waiter, or park it idle.
    /// Must be called with the state lock held.
    fn park_or_handoff(&self, inner: &mut Inner<T>, slot_id: SlotId, resource: T) {
        let stale = match inner.slots.get(&slot_id) {
            Some(slot) => slot.validation_due(&self.shared.config),
            None => {
                inner.doomed.push((slot_id, resource));
                return;
            }
        };
        let mut resource = resource;
        while let Some(waiter) = inner.waiters.pop_front() {
            let grant = Grant::Slot(CheckedOut {
                registry: self.clone(),
                slot_id,
                resource: Some(resource),
                stale,
            });
            match waiter.tx.send(grant) {
                Ok(()) => {
                    if let Some(slot) = inner.slots.get_mut(&slot_id) {
                        slot.owner = None;
                    }
                    return;
                }
                Err(Grant::Slot(mut checked_out)) => {
                    // Waiter gone before the registry could reach it; the
                    // grant must be defused here, not dropped, because the
                    // lock is held.
                    match checked_out.defuse() {
                        Some(returned) => resource = returned,
                        None => return,
                    }
                }
                Err(Grant::Admission(_)) => unreachable!("slot grant round-trips unchanged"),
            }
        }
        if let Some(slot) = inner.slots.get_mut(&slot_id) {
            slot.state = SlotState::Idle;
            slot.resource = Some(resource);
            slot.owner = None;
            inner.idle.push(slot_id);
        }
    }

    /// Offer freed capacity to the next waiter by transferring a
    /// reservation. Must be called with the state lock held.
    fn offer_capacity(&self, inner: &mut Inner<T>) {
        while !inner.closed && inner.slots.len() + inner.reserved < self.shared.config.max_size {
            let Some(waiter) = inner.waiters.pop_front() else {
                return;
            };
            inner.reserved += 1;
            let grant = Grant::Admission(Admission {
                registry: self.clone(),
                done: false,
            });
            match waiter.tx.send(grant) {
                Ok(()) => return,
                Err(Grant::Admission(mut admission)) => {
                    // Same defusal rule as park_or_handoff: the lock is held.
                    admission.done = true;
                    inner.reserved -= 1;
                }
                Err(Grant::Slot(_)) => unreachable!("admission grant round-trips unchanged"),
            }
        }
    }
}
