//! Slot bookkeeping types

use std::time::Instant;

use crate::config::PoolConfig;

/// Identifier of a pool slot.
///
/// Assigned sequentially by the registry; never reused within a pool's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub(crate) u64);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// Lifecycle state of a slot.
///
/// Transitions are monotonic except `InUse ↔ Idle`, which cycles. A slot
/// marked `Retiring` while its resource is out with a caller is destroyed on
/// release, never closed out from under the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Resource is parked in the pool, ready to be leased.
    Idle,
    /// Resource is out with exactly one caller.
    InUse,
    /// Marked for destruction; closed once no caller holds it.
    Retiring,
    /// Destroyed and about to be removed from the registry.
    Closed,
}

/// One unit of pooled capacity, bound to a single physical resource.
///
/// The resource itself is `Some` only while the slot is idle; a leased
/// slot's resource travels with the lease and returns on release.
#[derive(Debug)]
pub(crate) struct Slot<T> {
    pub(crate) state: SlotState,
    pub(crate) resource: Option<T>,
    pub(crate) created_at: Instant,
    pub(crate) last_used: Instant,
    pub(crate) last_validated: Instant,
    pub(crate) owner: Option<String>,
}

impl<T> Slot<T> {
    pub(crate) fn new_in_use(owner: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            state: SlotState::InUse,
            resource: None,
            created_at: now,
            last_used: now,
            last_validated: now,
            owner: Some(owner.into()),
        }
    }

    /// Past its configured maximum lifetime (zero disables).
    pub(crate) fn lifetime_expired(&self, config: &PoolConfig) -> bool {
        !config.max_lifetime.is_zero() && self.created_at.elapsed() > config.max_lifetime
    }

    /// Idle for longer than the configured idle timeout (zero disables).
    pub(crate) fn idle_expired(&self, config: &PoolConfig) -> bool {
        !config.idle_timeout.is_zero() && self.last_used.elapsed() > config.idle_timeout
    }

    /// Unvalidated for longer than the keepalive interval (zero disables).
    pub(crate) fn validation_due(&self, config: &PoolConfig) -> bool {
        !config.keepalive_interval.is_zero()
            && self.last_validated.elapsed() > config.keepalive_interval
    }
}
