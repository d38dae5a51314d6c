//! The resource factory trait
//!
//! A [`ResourceFactory`] teaches the pool how to create, validate, and
//! destroy whatever physical resource is being pooled: a database
//! connection, a network session, a handle into some external system. The
//! pool never touches the resource itself beyond moving it between slots and
//! leases.

use std::future::Future;

use crate::context::Context;
use crate::error::Result;

/// Factory for the pooled resource's full lifecycle.
///
/// Methods are declared as `impl Future + Send` so implementations can be
/// written as plain `async fn`. `validate` and `destroy` have defaults for
/// resources that need neither.
pub trait ResourceFactory: Send + Sync + 'static {
    /// The resource type produced by this factory.
    type Resource: Send + 'static;

    /// Name of this pool, used in errors and log events.
    fn name(&self) -> &str;

    /// Create a new resource.
    ///
    /// Failures surface to the acquiring caller immediately; the pool never
    /// retries creation inline. Background top-up retries with backoff on the
    /// next maintenance tick.
    fn create(&self, ctx: &Context) -> impl Future<Output = Result<Self::Resource>> + Send;

    /// Check whether an existing resource is still usable.
    ///
    /// The pool bounds each call with the configured validation timeout; an
    /// error or a timeout counts as invalid.
    fn validate(
        &self,
        _resource: &mut Self::Resource,
    ) -> impl Future<Output = Result<bool>> + Send {
        async { Ok(true) }
    }

    /// Tear down a resource that is leaving the pool.
    ///
    /// Best-effort: errors are logged by the pool and otherwise ignored.
    fn destroy(&self, resource: Self::Resource) -> impl Future<Output = Result<()>> + Send {
        async move {
            drop(resource);
            Ok(())
        }
    }
}
