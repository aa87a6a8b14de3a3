//! Common test utilities for broker integration tests
//!
//! - `MathService`: counts invocations per node
//! - `FlakyService`: fails a configurable number of times before succeeding
//! - `node`: a broker attached to a shared in-memory bus

#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use serde_json::json;
use servex_broker::{
    ActionTable, Broker, BrokerConfig, MemoryBus, Params, Service, ServiceContext, Value,
};

/// Adds `a` and `b`, counting invocations
#[derive(Default)]
pub struct MathService {
    pub hits: AtomicUsize,
}

impl MathService {
    async fn add(&self, params: Params) -> anyhow::Result<Value> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let a = params.get("a").and_then(Value::as_i64).unwrap_or(0);
        let b = params.get("b").and_then(Value::as_i64).unwrap_or(0);
        Ok(json!(a + b))
    }
}

impl Service for MathService {
    fn actions(self: Arc<Self>) -> ActionTable {
        ActionTable::new().action("add", move |_ctx: ServiceContext, params| {
            let this = self.clone();
            async move { this.add(params).await }
        })
    }
}

/// Fails the first `failures` calls, then answers `"ok"`
pub struct FlakyService {
    pub failures: usize,
    pub attempts: AtomicUsize,
}

impl FlakyService {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: AtomicUsize::new(0),
        }
    }

    async fn fetch(&self) -> anyhow::Result<Value> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            anyhow::bail!("upstream unavailable (attempt {})", attempt + 1);
        }
        Ok(json!("ok"))
    }
}

impl Service for FlakyService {
    fn actions(self: Arc<Self>) -> ActionTable {
        ActionTable::new().action("fetch", move |_ctx: ServiceContext, _params| {
            let this = self.clone();
            async move { this.fetch().await }
        })
    }
}

pub fn config(node_id: &str) -> BrokerConfig {
    BrokerConfig {
        node_id: node_id.to_string(),
        internal_services: false,
        ..Default::default()
    }
}

/// Broker attached to `bus` under `node_id`
pub fn node(bus: &MemoryBus, node_id: &str) -> Broker {
    node_with(bus, config(node_id))
}

pub fn node_with(bus: &MemoryBus, config: BrokerConfig) -> Broker {
    let transport = bus.transport(config.node_id.clone());
    Broker::builder(config)
        .transport(transport)
        .build()
        .unwrap()
}

/// Poll `condition` until it holds, yielding to background tasks in between
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

pub fn params(value: Value) -> Params {
    value.as_object().cloned().unwrap_or_default()
}
