//! Contracts for external collaborators
//!
//! The broker core consumes a wire transport and a key-value cache without
//! knowing their concrete implementations. Both are shared resources and are
//! responsible for their own thread safety.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;

use crate::{Params, Value, error::Result};

/// Handler invoked for every message arriving on a subscribed topic
pub type TopicHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Handler answering calls addressed to this node: `(action, params) -> result`
pub type RequestHandler =
    Arc<dyn Fn(String, Params) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Cluster transport contract
///
/// Broadcasts are best-effort and fire-and-forget: no acknowledgement and no
/// ordering guarantee between nodes.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the transport. Fails loudly if the connection cannot be made;
    /// a no-op when already connected.
    async fn connect(&self) -> Result<()>;

    /// Disconnect from the transport; a no-op when already disconnected.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the transport is currently connected
    fn is_connected(&self) -> bool;

    /// Call an action on a remote node. Fails if not connected.
    async fn call(&self, node_id: &str, action: &str, params: Params) -> Result<Value>;

    /// Broadcast a payload to every node listening on `topic`
    async fn broadcast(&self, topic: &str, payload: Value) -> Result<()>;

    /// Register a handler for a topic. Multiple handlers per topic are allowed.
    fn subscribe(&self, topic: &str, handler: TopicHandler);

    /// Install the handler answering calls addressed to this node.
    ///
    /// Transports that only originate calls can ignore it.
    fn set_request_handler(&self, _handler: RequestHandler) {}
}

/// Key-value cache contract
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a value, `None` on miss
    async fn get(&self, key: &str) -> Option<Value>;

    /// Fetch a value or fall back to `default` on miss
    async fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).await.unwrap_or(default)
    }

    /// Store a value for `ttl`. Returns true on success.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> bool;

    /// Remove a value. Returns true if something was removed.
    async fn delete(&self, key: &str) -> bool;

    /// Whether a live entry exists for `key`
    async fn has(&self, key: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;

    #[derive(Default)]
    struct MapCache {
        entries: Mutex<HashMap<String, Value>>,
    }

    #[async_trait::async_trait]
    impl Cache for MapCache {
        async fn get(&self, key: &str) -> Option<Value> {
            self.entries.lock().unwrap().get(key).cloned()
        }

        async fn set(&self, key: &str, value: Value, _ttl: Duration) -> bool {
            self.entries.lock().unwrap().insert(key.to_string(), value);
            true
        }

        async fn delete(&self, key: &str) -> bool {
            self.entries.lock().unwrap().remove(key).is_some()
        }

        async fn has(&self, key: &str) -> bool {
            self.entries.lock().unwrap().contains_key(key)
        }
    }

    #[tokio::test]
    async fn test_cache_get_or_default() {
        let cache = MapCache::default();
        let fallback = Value::String("fallback".to_string());

        assert_eq!(cache.get_or("missing", fallback.clone()).await, fallback);

        assert!(cache.set("present", Value::from(42), Duration::from_secs(1)).await);
        assert_eq!(cache.get_or("present", fallback).await, Value::from(42));
        assert!(cache.has("present").await);
        assert!(cache.delete("present").await);
        assert!(!cache.has("present").await);
    }
}
