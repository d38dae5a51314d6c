//! # corral
//!
//! Cancellation-safe asynchronous resource pooling.
//!
//! A [`Pool`] owns a bounded set of expensive, stateful resources (database
//! connections are the canonical case) and hands them out to concurrent
//! tasks as RAII [`Lease`]s under a bounded wait. A background maintenance
//! task retires resources on idle/lifetime policy, keepalive-validates idle
//! ones, and keeps the pool topped up to its minimum-idle target.
//!
//! The defining guarantee is cancellation safety: a blocked `acquire` whose
//! [`Context`] token fires mid-wait never leaks a resource and never
//! disturbs other acquirers. If a release satisfies a waiter in the same
//! instant it is cancelled, the granted slot unwinds back into the pool (or
//! on to the next waiter) before the cancellation error returns, and no
//! cancellation state outlives the call it interrupted.
//!
//! ```rust,no_run
//! use corral::{Context, Outcome, Pool, PoolConfig, ResourceFactory, Result};
//!
//! /// Stand-in for a driver that opens real connections.
//! struct ConnectionFactory;
//!
//! impl ResourceFactory for ConnectionFactory {
//!     type Resource = String;
//!
//!     fn name(&self) -> &str {
//!         "upstream"
//!     }
//!
//!     async fn create(&self, ctx: &Context) -> Result<Self::Resource> {
//!         Ok(format!("connection opened for {}", ctx.caller))
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let pool = Pool::new(ConnectionFactory, PoolConfig::default())?;
//! let ctx = Context::new("worker-1");
//! let lease = pool.acquire(&ctx).await?;
//! // use *lease ...
//! lease.release(Outcome::Ok).await;
//! pool.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod lease;
pub mod pool;
pub mod slot;

mod maintenance;
mod registry;
mod scheduler;

pub use config::PoolConfig;
pub use context::Context;
pub use error::{Error, Result};
pub use factory::ResourceFactory;
pub use lease::{Lease, Outcome};
pub use pool::{Pool, PoolStats};
pub use slot::{SlotId, SlotState};
