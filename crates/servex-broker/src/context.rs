//! Per-call state threaded through the middleware chain

use std::time::Duration;

use servex_common::{Params, Value};

use crate::config::RetryPolicy;

/// Retry bookkeeping attached by the retry middleware
#[derive(Clone, Debug, PartialEq)]
pub struct RetryState {
    pub retries: u32,
    /// Base delay in milliseconds
    pub delay: u64,
    /// Upper bound for a single wait in milliseconds
    pub max_delay: u64,
    pub factor: f64,
    pub current_retry: u32,
}

impl RetryState {
    pub fn new(retries: u32, delay: u64, max_delay: u64, factor: f64) -> Self {
        Self {
            retries,
            delay,
            max_delay,
            factor,
            current_retry: 0,
        }
    }

    /// Wait before the next attempt: `min(delay * factor^current_retry, max_delay)`.
    /// `None` once the retry cap is reached.
    pub fn next_backoff(&self) -> Option<Duration> {
        if self.current_retry >= self.retries {
            return None;
        }
        let exponent = i32::try_from(self.current_retry).unwrap_or(i32::MAX);
        let wait = (self.delay as f64) * self.factor.powi(exponent);
        let wait = wait.min(self.max_delay as f64).max(0.0);
        Some(Duration::from_millis(wait as u64))
    }
}

impl From<&RetryPolicy> for RetryState {
    fn from(policy: &RetryPolicy) -> Self {
        Self::new(policy.retries, policy.delay, policy.max_delay, policy.factor)
    }
}

/// State of one invocation, owned by the call that created it
#[derive(Clone, Debug)]
pub struct CallContext {
    pub action: String,
    pub params: Params,
    pub caller_node_id: String,
    /// Set by the caching middleware on a miss; the result is stored under it
    pub cache_key: Option<String>,
    pub retry_state: Option<RetryState>,
    /// Set by a middleware to answer the call without invoking the target
    pub result: Option<Value>,
}

impl CallContext {
    pub fn new(action: impl Into<String>, params: Params, caller_node_id: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params,
            caller_node_id: caller_node_id.into(),
            cache_key: None,
            retry_state: None,
            result: None,
        }
    }

    /// Whether a middleware already produced the result
    pub fn is_answered(&self) -> bool {
        self.result.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(state: &RetryState) -> Option<u128> {
        state.next_backoff().map(|d| d.as_millis())
    }

    #[test]
    fn test_backoff_sequence() {
        let mut state = RetryState::new(3, 100, 2000, 2.0);
        let mut waits = Vec::new();
        while let Some(wait) = millis(&state) {
            waits.push(wait);
            state.current_retry += 1;
        }
        assert_eq!(waits, vec![100, 200, 400]);
    }

    #[test]
    fn test_backoff_clamped_to_max_delay() {
        let mut state = RetryState::new(3, 100, 250, 2.0);
        state.current_retry = 2;
        assert_eq!(millis(&state), Some(250));
    }

    #[test]
    fn test_no_retries_configured() {
        let state = RetryState::new(0, 100, 2000, 2.0);
        assert_eq!(state.next_backoff(), None);
    }

    #[test]
    fn test_from_policy() {
        let state = RetryState::from(&RetryPolicy::default());
        assert_eq!(state.retries, 5);
        assert_eq!(state.current_retry, 0);
    }

    #[test]
    fn test_new_context_is_unanswered() {
        let ctx = CallContext::new("math.add", Params::new(), "node-1");
        assert!(!ctx.is_answered());
        assert!(ctx.cache_key.is_none());
        assert!(ctx.retry_state.is_none());
    }
}
