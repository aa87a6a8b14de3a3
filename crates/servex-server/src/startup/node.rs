//! Broker assembly for a standalone node

use std::sync::Arc;

use servex_broker::{Broker, BrokerConfig, MemoryBus, MemoryCache, Result};
use tracing::info;

/// Build a broker attached to `bus`, with a memory cache when result caching
/// is configured
pub fn build_broker(config: BrokerConfig, bus: &MemoryBus) -> Result<Broker> {
    let transport = bus.transport(config.node_id.clone());
    let mut builder = Broker::builder(config.clone()).transport(transport);
    if config.cacher.is_some() {
        builder = builder.cache(Arc::new(MemoryCache::default()));
    }
    builder.build()
}

/// Log a one-line summary of the started node
pub fn log_startup_summary(broker: &Broker) {
    let config = broker.config();
    info!(
        node_id = %broker.node_id(),
        namespace = %config.namespace,
        strategy = %config.registry.strategy,
        prefer_local = config.registry.prefer_local,
        retry = config.retry_policy.enabled,
        cache = broker.cache().is_some(),
        services = broker.services().len(),
        "Servex node is ready"
    );
}
