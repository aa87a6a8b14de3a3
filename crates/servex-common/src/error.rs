//! Error types for Servex
//!
//! This module defines:
//! - `ServexError`: the broker-wide error taxonomy
//! - `Result`: convenience alias used across the workspace

/// Broker-wide error type
#[derive(thiserror::Error, Debug)]
pub enum ServexError {
    #[error("invalid action name '{0}', expected 'service.action'")]
    InvalidActionFormat(String),

    #[error("service or action not found: {0}")]
    ActionNotFound(String),

    #[error("no available node for action: {0}")]
    NoAvailableNode(String),

    #[error("transport is not connected")]
    TransportUnavailable,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("retry limit reached for action '{action}' after {attempts} retries: {source}")]
    RetryExhausted {
        action: String,
        attempts: u32,
        #[source]
        source: Box<ServexError>,
    },

    #[error("service '{0}' is not registered")]
    ServiceNotRegistered(String),

    #[error(transparent)]
    Handler(#[from] anyhow::Error),

    #[error("call to '{action}' timed out after {timeout_ms}ms")]
    Timeout { action: String, timeout_ms: u64 },

    #[error("call to '{0}' was cancelled")]
    Cancelled(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("broker is no longer running")]
    BrokerUnavailable,

    #[error("invalid broker state: {0}")]
    InvalidState(String),
}

impl ServexError {
    /// Returns the innermost error, unwrapping retry exhaustion wrappers
    pub fn root_cause(&self) -> &ServexError {
        match self {
            ServexError::RetryExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether the error is caused by call validation rather than execution
    pub fn is_validation(&self) -> bool {
        matches!(self, ServexError::InvalidActionFormat(_))
    }

    /// Whether a failed invocation may be attempted again. Only handler and
    /// transport failures qualify; lookup misses and validation fail fast.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServexError::Handler(_)
                | ServexError::Transport(_)
                | ServexError::TransportUnavailable
                | ServexError::NoAvailableNode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ServexError>;
