//! Utility functions for Servex
//!
//! Common helpers used across the workspace.

use md5::{Digest, Md5};

use crate::{ACTION_SEPARATOR, Params, Value, error::ServexError};

/// Split a full action name into `(service, action)`
///
/// Exactly one separator is allowed and neither side may be empty.
///
/// # Examples
///
/// ```
/// use servex_common::split_action_name;
///
/// assert_eq!(split_action_name("user.get").unwrap(), ("user", "get"));
/// assert!(split_action_name("user").is_err());
/// assert!(split_action_name("a.b.c").is_err());
/// ```
pub fn split_action_name(action_name: &str) -> Result<(&str, &str), ServexError> {
    let mut parts = action_name.split(ACTION_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(service), Some(action), None) if !service.is_empty() && !action.is_empty() => {
            Ok((service, action))
        }
        _ => Err(ServexError::InvalidActionFormat(action_name.to_string())),
    }
}

/// Build a full action name from its parts
pub fn full_action_name(service: &str, action: &str) -> String {
    format!("{}{}{}", service, ACTION_SEPARATOR, action)
}

/// Deterministic hash of call parameters
///
/// Object keys are sorted recursively before hashing, so two maps holding the
/// same values hash identically regardless of insertion order.
pub fn params_hash(params: &Params) -> String {
    let canonical = canonicalize(&Value::Object(params.clone()));
    let digest = Md5::digest(canonical.to_string().as_bytes());
    const_hex::encode(digest)
}

/// Default cache key: `action:<name>:<params hash>`
pub fn default_cache_key(action_name: &str, params: &Params) -> String {
    format!("action:{}:{}", action_name, params_hash(params))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Params::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Current unix timestamp in seconds
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Generate a node id of the form `node-<13 hex chars>`
pub fn generate_node_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("node-{}", &id[..13])
}
