//! Call middleware pipeline
//!
//! Middlewares run in registration order before every call. Each one may
//! modify the [`CallContext`] or answer the call outright by setting
//! `ctx.result`, which skips the remaining middlewares and the invocation.

mod caching;
mod retry;

pub use caching::{CachingMiddleware, KeyGenerator};
pub use retry::{RetryMiddleware, handle_error};

use std::collections::HashSet;

use async_trait::async_trait;
use servex_common::{Result, Value};

use crate::context::CallContext;

#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Inspect or modify the context before the call. Setting `ctx.result`
    /// short-circuits the call.
    async fn process(&self, ctx: &mut CallContext) -> Result<()>;

    /// Observe a successful invocation result
    async fn after_call(&self, _ctx: &CallContext, _result: &Value) {}
}

/// Optional action allowlist shared by the built-in middlewares
#[derive(Clone, Debug, Default)]
pub(crate) struct ActionFilter {
    actions: HashSet<String>,
}

impl ActionFilter {
    pub(crate) fn new<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
        }
    }

    /// An empty allowlist matches every action
    pub(crate) fn matches(&self, action: &str) -> bool {
        self.actions.is_empty() || self.actions.contains(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_filter() {
        let all = ActionFilter::default();
        assert!(all.matches("math.add"));

        let only = ActionFilter::new(["math.add"]);
        assert!(only.matches("math.add"));
        assert!(!only.matches("math.sub"));
    }
}
