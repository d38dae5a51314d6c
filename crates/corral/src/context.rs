//! Per-call context with cancellation support

use tokio_util::sync::CancellationToken;

/// Context for a single pool operation.
///
/// Carries a caller label (recorded on the slot while leased) and a
/// cooperative cancellation token. Cancellation state is strictly local to
/// the call the context is passed to; a token that fires during one
/// `acquire` has no effect on any later call.
#[derive(Debug, Clone)]
pub struct Context {
    /// Label identifying the caller, recorded as the slot owner while leased.
    pub caller: String,
    /// Cooperative cancellation token; a blocked `acquire` observing this
    /// token fire unwinds without leaking the slot it may have been granted.
    pub cancellation: CancellationToken,
}

impl Context {
    /// Create a new context with the given caller label.
    pub fn new(caller: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Replace the default cancellation token with the provided one.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new("anonymous")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_creation() {
        let ctx = Context::new("worker-1");
        assert_eq!(ctx.caller, "worker-1");
        assert!(!ctx.cancellation.is_cancelled());
    }

    #[test]
    fn context_with_cancellation() {
        let token = CancellationToken::new();
        let ctx = Context::new("worker-1").with_cancellation(token.child_token());
        assert!(!ctx.cancellation.is_cancelled());
        token.cancel();
        assert!(ctx.cancellation.is_cancelled());
    }
}
