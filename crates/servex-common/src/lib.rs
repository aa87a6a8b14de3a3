//! Servex Common - Shared types, contracts, and utilities
//!
//! This crate provides the foundational pieces used across all Servex components:
//! - The broker-wide error taxonomy
//! - Contracts for the external transport and cache
//! - Action-name parsing and deterministic parameter hashing

pub mod error;
pub mod traits;
pub mod utils;

// Re-exports for convenience
pub use error::{Result, ServexError};
pub use traits::{Cache, RequestHandler, TopicHandler, Transport};
pub use utils::{
    default_cache_key, full_action_name, generate_node_id, params_hash, split_action_name,
    unix_timestamp,
};

/// Dynamic value passed through calls, events and the cache
pub use serde_json::Value;

/// Ordered call parameters / event data
pub type Params = serde_json::Map<String, Value>;

/// Separator between service and action names
pub const ACTION_SEPARATOR: char = '.';
