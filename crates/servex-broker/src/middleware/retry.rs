//! Retry with exponential backoff
//!
//! The middleware only attaches [`RetryState`] to the context; the broker
//! calls [`handle_error`] when an invocation fails, so successful calls pay
//! nothing for retry support.

use async_trait::async_trait;
use servex_common::{Result, ServexError};
use tracing::{error, warn};

use super::{ActionFilter, Middleware};
use crate::{
    config::RetryPolicy,
    context::{CallContext, RetryState},
    shutdown::ShutdownSignal,
};

pub struct RetryMiddleware {
    policy: RetryPolicy,
    filter: ActionFilter,
}

impl RetryMiddleware {
    pub fn new(policy: RetryPolicy) -> Self {
        let filter = ActionFilter::new(policy.actions.iter().cloned());
        Self { policy, filter }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    async fn process(&self, ctx: &mut CallContext) -> Result<()> {
        if self.filter.matches(&ctx.action) {
            ctx.retry_state = Some(RetryState::from(&self.policy));
        }
        Ok(())
    }
}

/// Decide what to do with a failed attempt
///
/// Returns `Ok(())` after sleeping the backoff when the call should be
/// attempted again. Otherwise returns the error to surface: `err` itself
/// when it is not retryable, `RetryExhausted` wrapping it once the cap is
/// reached, or `Cancelled` when shutdown interrupts the wait.
pub async fn handle_error(
    state: &mut RetryState,
    action: &str,
    err: ServexError,
    shutdown: &ShutdownSignal,
) -> Result<()> {
    if !err.is_retryable() || state.retries == 0 {
        return Err(err);
    }

    let Some(wait) = state.next_backoff() else {
        error!(
            action = %action,
            retries = state.retries,
            error = %err,
            "Retry limit reached"
        );
        return Err(ServexError::RetryExhausted {
            action: action.to_string(),
            attempts: state.current_retry,
            source: Box::new(err),
        });
    };

    warn!(
        action = %action,
        attempt = state.current_retry + 1,
        retries = state.retries,
        wait_ms = wait.as_millis() as u64,
        error = %err,
        "Retrying action"
    );

    tokio::select! {
        _ = tokio::time::sleep(wait) => {}
        _ = shutdown.wait() => {
            return Err(ServexError::Cancelled(action.to_string()));
        }
    }

    state.current_retry += 1;
    Ok(())
}
