//! Pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a resource pool.
///
/// A `Duration::ZERO` in `max_lifetime`, `idle_timeout`, or
/// `keepalive_interval` disables the respective policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Target number of resources kept ready (best-effort, maintained by the
    /// background maintenance loop)
    pub min_idle: usize,
    /// Maximum number of resources, counting in-flight creations
    pub max_size: usize,
    /// Maximum time to wait for a resource in `acquire`
    pub acquire_timeout: Duration,
    /// Maximum lifetime of a resource; in-use resources past this age are
    /// retired on release, never closed out from under the caller
    pub max_lifetime: Duration,
    /// Time after which idle resources above `min_idle` are retired
    pub idle_timeout: Duration,
    /// Idle resources unvalidated for longer than this are re-validated
    /// before being handed out or kept
    pub keepalive_interval: Duration,
    /// Timeout applied to each factory `validate` call
    pub validation_timeout: Duration,
    /// Period of the background maintenance loop
    pub maintenance_interval: Duration,
    /// When true, keepalive validation runs as a regular lease: it refreshes
    /// the last-used timestamp and shows up in acquisition/release counters.
    /// When false, validation bypasses usage accounting.
    pub isolate_internal_ops: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 8,
            max_size: 20,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(1800),
            idle_timeout: Duration::from_secs(600),
            keepalive_interval: Duration::from_secs(120),
            validation_timeout: Duration::from_secs(5),
            maintenance_interval: Duration::from_secs(30),
            isolate_internal_ops: false,
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::configuration("max_size must be greater than 0"));
        }
        if self.min_idle > self.max_size {
            return Err(Error::configuration(format!(
                "min_idle ({}) must not exceed max_size ({})",
                self.min_idle, self.max_size
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(Error::configuration(
                "acquire_timeout must be greater than zero",
            ));
        }
        if self.maintenance_interval.is_zero() {
            return Err(Error::configuration(
                "maintenance_interval must be greater than zero",
            ));
        }
        if !self.max_lifetime.is_zero()
            && !self.keepalive_interval.is_zero()
            && self.keepalive_interval >= self.max_lifetime
        {
            return Err(Error::configuration(format!(
                "keepalive_interval ({:?}) must be shorter than max_lifetime ({:?})",
                self.keepalive_interval, self.max_lifetime
            )));
        }
        Ok(())
    }
}
