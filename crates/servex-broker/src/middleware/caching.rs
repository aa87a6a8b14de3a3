//! Result caching middleware

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use servex_common::{Cache, Result, Value, default_cache_key};
use tracing::{debug, warn};

use super::{ActionFilter, Middleware};
use crate::{config::CacherConfig, context::CallContext};

/// Custom cache key derivation
pub type KeyGenerator = Arc<dyn Fn(&CallContext) -> String + Send + Sync>;

/// Answers calls from the cache and stores fresh results
///
/// On a hit the cached value becomes the call result. On a miss the key is
/// attached to the context and the result is stored after a successful
/// invocation, without holding up the caller.
pub struct CachingMiddleware {
    cache: Arc<dyn Cache>,
    ttl: Duration,
    key_generator: Option<KeyGenerator>,
    filter: ActionFilter,
}

impl CachingMiddleware {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            key_generator: None,
            filter: ActionFilter::default(),
        }
    }

    pub fn from_config(cache: Arc<dyn Cache>, config: &CacherConfig) -> Self {
        Self::new(cache, config.ttl()).with_actions(config.actions.iter().cloned())
    }

    /// Restrict caching to the listed actions
    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter = ActionFilter::new(actions);
        self
    }

    pub fn with_key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&CallContext) -> String + Send + Sync + 'static,
    {
        self.key_generator = Some(Arc::new(generator));
        self
    }

    pub fn cache_key(&self, ctx: &CallContext) -> String {
        match &self.key_generator {
            Some(generator) => generator(ctx),
            None => default_cache_key(&ctx.action, &ctx.params),
        }
    }
}

#[async_trait]
impl Middleware for CachingMiddleware {
    fn name(&self) -> &str {
        "caching"
    }

    async fn process(&self, ctx: &mut CallContext) -> Result<()> {
        if !self.filter.matches(&ctx.action) {
            return Ok(());
        }

        let key = self.cache_key(ctx);
        match self.cache.get(&key).await {
            Some(cached) => {
                debug!(action = %ctx.action, key = %key, "Cache hit");
                ctx.result = Some(cached);
            }
            None => {
                debug!(action = %ctx.action, key = %key, "Cache miss");
                ctx.cache_key = Some(key);
            }
        }
        Ok(())
    }

    async fn after_call(&self, ctx: &CallContext, result: &Value) {
        let Some(key) = ctx.cache_key.clone() else {
            return;
        };

        let cache = self.cache.clone();
        let ttl = self.ttl;
        let value = result.clone();
        let action = ctx.action.clone();
        tokio::spawn(async move {
            if cache.set(&key, value, ttl).await {
                debug!(action = %action, key = %key, "Cached action result");
            } else {
                warn!(action = %action, key = %key, "Failed to cache action result");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use servex_common::Params;

    use super::*;
    use crate::cache::MemoryCache;

    fn params(value: serde_json::Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_hit_short_circuits() {
        let cache = Arc::new(MemoryCache::new(100));
        let middleware = CachingMiddleware::new(cache.clone(), Duration::from_secs(60));

        let mut ctx = CallContext::new("math.add", params(json!({"a": 1, "b": 2})), "node-1");
        let key = middleware.cache_key(&ctx);
        assert!(key.starts_with("action:math.add:"));
        cache.set(&key, json!(3), Duration::from_secs(60)).await;

        middleware.process(&mut ctx).await.unwrap();
        assert_eq!(ctx.result, Some(json!(3)));
        assert!(ctx.cache_key.is_none());
    }

    #[tokio::test]
    async fn test_miss_attaches_key_and_stores_result() {
        let cache = Arc::new(MemoryCache::new(100));
        let middleware = CachingMiddleware::new(cache.clone(), Duration::from_secs(60));

        let mut ctx = CallContext::new("math.add", params(json!({"a": 1})), "node-1");
        middleware.process(&mut ctx).await.unwrap();
        assert!(ctx.result.is_none());
        let key = ctx.cache_key.clone().unwrap();

        middleware.after_call(&ctx, &json!(1)).await;
        for _ in 0..50 {
            if cache.has(&key).await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.get(&key).await, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_allowlist_skips_other_actions() {
        let cache = Arc::new(MemoryCache::new(100));
        let middleware =
            CachingMiddleware::new(cache, Duration::from_secs(60)).with_actions(["math.add"]);

        let mut ctx = CallContext::new("math.sub", Params::new(), "node-1");
        middleware.process(&mut ctx).await.unwrap();
        assert!(ctx.cache_key.is_none());
        assert!(ctx.result.is_none());
    }

    #[tokio::test]
    async fn test_key_is_insertion_order_independent() {
        let cache = Arc::new(MemoryCache::new(100));
        let middleware = CachingMiddleware::new(cache, Duration::from_secs(60));

        let first = CallContext::new("math.add", params(json!({"a": 1, "b": 2})), "node-1");
        let mut reordered = Params::new();
        reordered.insert("b".to_string(), json!(2));
        reordered.insert("a".to_string(), json!(1));
        let second = CallContext::new("math.add", reordered, "node-1");

        assert_eq!(middleware.cache_key(&first), middleware.cache_key(&second));
    }

    #[tokio::test]
    async fn test_custom_key_generator() {
        let cache = Arc::new(MemoryCache::new(100));
        let middleware = CachingMiddleware::new(cache, Duration::from_secs(60))
            .with_key_generator(|ctx| format!("custom:{}", ctx.action));

        let mut ctx = CallContext::new("user.get", Params::new(), "node-1");
        middleware.process(&mut ctx).await.unwrap();
        assert_eq!(ctx.cache_key.as_deref(), Some("custom:user.get"));
    }
}
