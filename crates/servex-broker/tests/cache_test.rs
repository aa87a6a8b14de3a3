// Integration tests for result caching
// The first call runs the handler and stores the result; repeats are
// answered from the cache until the entry expires

mod common;

use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use common::{MathService, config, node_with, params, wait_until};
use serde_json::json;
use servex_broker::{Broker, BrokerConfig, CacherConfig, MemoryBus, MemoryCache};
use servex_common::{Cache, default_cache_key};

fn hits(broker: &Broker) -> usize {
    broker
        .service::<MathService>()
        .unwrap()
        .hits
        .load(Ordering::SeqCst)
}

fn caching_config(node_id: &str, cacher: CacherConfig) -> BrokerConfig {
    BrokerConfig {
        cacher: Some(cacher),
        ..config(node_id)
    }
}

#[tokio::test]
async fn test_repeat_call_answered_from_cache() {
    let cache = Arc::new(MemoryCache::default());
    let broker = Broker::builder(caching_config("node-cache", CacherConfig::default()))
        .cache(cache.clone())
        .build()
        .unwrap();
    broker.create_service(MathService::default()).unwrap();

    let call_params = params(json!({"a": 2, "b": 2}));
    let key = default_cache_key("math.add", &call_params);

    assert_eq!(broker.call("math.add", call_params.clone()).await.unwrap(), json!(4));
    // The result is stored in the background
    wait_until(|| cache.entry_count() == 1).await;
    assert!(cache.has(&key).await);

    assert_eq!(broker.call("math.add", call_params).await.unwrap(), json!(4));
    assert_eq!(hits(&broker), 1);

    // Different params miss
    broker.call("math.add", params(json!({"a": 1, "b": 2}))).await.unwrap();
    assert_eq!(hits(&broker), 2);
}

#[tokio::test]
async fn test_expired_entry_reinvokes_handler() {
    let cache = Arc::new(MemoryCache::default());
    let broker = Broker::builder(caching_config(
        "node-cache",
        CacherConfig {
            ttl_secs: 1,
            actions: Vec::new(),
        },
    ))
    .cache(cache.clone())
    .build()
    .unwrap();
    broker.create_service(MathService::default()).unwrap();

    let call_params = params(json!({"a": 5, "b": 5}));
    broker.call("math.add", call_params.clone()).await.unwrap();
    wait_until(|| cache.entry_count() == 1).await;

    tokio::time::sleep(Duration::from_millis(1200)).await;
    broker.call("math.add", call_params).await.unwrap();
    assert_eq!(hits(&broker), 2);
}

#[tokio::test]
async fn test_uncached_actions_always_invoke() {
    let cache = Arc::new(MemoryCache::default());
    let broker = Broker::builder(caching_config(
        "node-cache",
        CacherConfig {
            actions: vec!["math.mul".to_string()],
            ..Default::default()
        },
    ))
    .cache(cache.clone())
    .build()
    .unwrap();
    broker.create_service(MathService::default()).unwrap();

    for _ in 0..3 {
        broker.call("math.add", params(json!({"a": 1, "b": 1}))).await.unwrap();
    }
    assert_eq!(hits(&broker), 3);
    assert_eq!(cache.entry_count(), 0);
}

#[tokio::test]
async fn test_remote_results_cached_by_caller() {
    let bus = MemoryBus::new();
    let cache = Arc::new(MemoryCache::default());
    let transport = bus.transport("caller");
    let caller = Broker::builder(caching_config("caller", CacherConfig::default()))
        .transport(transport)
        .cache(cache.clone())
        .build()
        .unwrap();
    let provider = node_with(&bus, config("provider"));
    provider.create_service(MathService::default()).unwrap();

    caller.start().await.unwrap();
    provider.start().await.unwrap();
    wait_until(|| caller.registry().has_action("math.add")).await;

    let call_params = params(json!({"a": 7, "b": 8}));
    assert_eq!(caller.call("math.add", call_params.clone()).await.unwrap(), json!(15));
    wait_until(|| cache.entry_count() == 1).await;
    assert_eq!(caller.call("math.add", call_params).await.unwrap(), json!(15));

    assert_eq!(hits(&provider), 1);

    caller.stop().await.unwrap();
    provider.stop().await.unwrap();
}
