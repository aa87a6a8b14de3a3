//! In-process transport
//!
//! Every [`MemoryTransport`] attached to the same [`MemoryBus`] receives the
//! broadcasts of all connected transports, its own included. Calls are routed
//! to the request handler installed by the target node.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use servex_common::{Params, RequestHandler, Result, ServexError, TopicHandler, Transport, Value};
use tracing::{debug, info};

struct Endpoint {
    node_id: String,
    connected: AtomicBool,
    topics: RwLock<HashMap<String, Vec<TopicHandler>>>,
    request_handler: RwLock<Option<RequestHandler>>,
}

impl Endpoint {
    fn handlers(&self, topic: &str) -> Vec<TopicHandler> {
        self.topics.read().get(topic).cloned().unwrap_or_default()
    }
}

/// Shared medium connecting in-process transports
#[derive(Clone, Default)]
pub struct MemoryBus {
    endpoints: Arc<DashMap<String, Arc<Endpoint>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport for `node_id` attached to this bus
    pub fn transport(&self, node_id: impl Into<String>) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport::new(self.clone(), node_id))
    }

    /// Ids of the currently connected nodes
    pub fn connected_nodes(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.key().clone()).collect()
    }

    fn deliver(&self, topic: &str, payload: &Value) -> usize {
        let endpoints: Vec<Arc<Endpoint>> =
            self.endpoints.iter().map(|e| e.value().clone()).collect();

        let mut delivered = 0;
        for endpoint in endpoints {
            if !endpoint.connected.load(Ordering::SeqCst) {
                continue;
            }
            for handler in endpoint.handlers(topic) {
                handler(payload.clone());
                delivered += 1;
            }
        }
        delivered
    }
}

/// [`Transport`] over a [`MemoryBus`]
pub struct MemoryTransport {
    bus: MemoryBus,
    endpoint: Arc<Endpoint>,
}

impl MemoryTransport {
    pub fn new(bus: MemoryBus, node_id: impl Into<String>) -> Self {
        Self {
            bus,
            endpoint: Arc::new(Endpoint {
                node_id: node_id.into(),
                connected: AtomicBool::new(false),
                topics: RwLock::new(HashMap::new()),
                request_handler: RwLock::new(None),
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.endpoint.node_id
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<()> {
        if self.endpoint.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.bus
            .endpoints
            .insert(self.endpoint.node_id.clone(), self.endpoint.clone());
        info!(node_id = %self.endpoint.node_id, "Memory transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.endpoint.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.bus
            .endpoints
            .remove_if(&self.endpoint.node_id, |_, e| Arc::ptr_eq(e, &self.endpoint));
        info!(node_id = %self.endpoint.node_id, "Memory transport disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.endpoint.connected.load(Ordering::SeqCst)
    }

    async fn call(&self, node_id: &str, action: &str, params: Params) -> Result<Value> {
        if !self.is_connected() {
            return Err(ServexError::TransportUnavailable);
        }

        let handler = {
            let endpoint = self
                .bus
                .endpoints
                .get(node_id)
                .map(|e| e.value().clone())
                .ok_or_else(|| ServexError::Transport(format!("node '{}' is not reachable", node_id)))?;
            let handler = endpoint.request_handler.read().clone();
            handler.ok_or_else(|| {
                ServexError::Transport(format!("node '{}' does not accept calls", node_id))
            })?
        };

        debug!(from = %self.endpoint.node_id, to = %node_id, action = %action, "Memory transport call");
        handler(action.to_string(), params).await
    }

    async fn broadcast(&self, topic: &str, payload: Value) -> Result<()> {
        if !self.is_connected() {
            return Err(ServexError::TransportUnavailable);
        }
        let delivered = self.bus.deliver(topic, &payload);
        debug!(topic = %topic, delivered = delivered, "Memory transport broadcast");
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: TopicHandler) {
        self.endpoint
            .topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    fn set_request_handler(&self, handler: RequestHandler) {
        *self.endpoint.request_handler.write() = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::future::BoxFuture;
    use serde_json::json;

    use super::*;

    fn counter(transport: &MemoryTransport, topic: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        transport.subscribe(
            topic,
            Arc::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        count
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_connected() {
        let bus = MemoryBus::new();
        let a = bus.transport("a");
        let b = bus.transport("b");
        let c = bus.transport("c");
        let seen_a = counter(&a, "heartbeat");
        let seen_b = counter(&b, "heartbeat");
        let seen_c = counter(&c, "heartbeat");

        a.connect().await.unwrap();
        b.connect().await.unwrap();

        a.broadcast("heartbeat", json!({"sender": "a"})).await.unwrap();
        assert_eq!(seen_a.load(Ordering::SeqCst), 1);
        assert_eq!(seen_b.load(Ordering::SeqCst), 1);
        // Not connected
        assert_eq!(seen_c.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_disconnect_idempotent() {
        let bus = MemoryBus::new();
        let a = bus.transport("a");

        a.connect().await.unwrap();
        a.connect().await.unwrap();
        assert!(a.is_connected());
        assert_eq!(bus.connected_nodes(), vec!["a".to_string()]);

        a.disconnect().await.unwrap();
        a.disconnect().await.unwrap();
        assert!(!a.is_connected());
        assert!(bus.connected_nodes().is_empty());
    }

    #[tokio::test]
    async fn test_call_routes_to_target_handler() {
        let bus = MemoryBus::new();
        let a = bus.transport("a");
        let b = bus.transport("b");
        b.set_request_handler(Arc::new(
            |action: String, params: Params| -> BoxFuture<'static, Result<Value>> {
                Box::pin(async move { Ok(json!({"action": action, "params": params})) })
            },
        ));
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        let mut params = Params::new();
        params.insert("id".to_string(), json!(1));
        let result = a.call("b", "user.get", params).await.unwrap();
        assert_eq!(result["action"], json!("user.get"));
        assert_eq!(result["params"]["id"], json!(1));
    }

    #[tokio::test]
    async fn test_call_failures() {
        let bus = MemoryBus::new();
        let a = bus.transport("a");

        let result = a.call("b", "user.get", Params::new()).await;
        assert!(matches!(result, Err(ServexError::TransportUnavailable)));

        a.connect().await.unwrap();
        let result = a.call("b", "user.get", Params::new()).await;
        assert!(matches!(result, Err(ServexError::Transport(_))));

        let b = bus.transport("b");
        b.connect().await.unwrap();
        let result = a.call("b", "user.get", Params::new()).await;
        assert!(matches!(result, Err(ServexError::Transport(_))));
    }
}
