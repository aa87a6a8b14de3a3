//! Servex Broker - Call routing and cluster coordination
//!
//! This crate provides:
//! - The `Broker` orchestrator (local vs remote dispatch, lifecycle)
//! - The middleware pipeline with result caching and retry with backoff
//! - The local event bus and cross-node event propagation
//! - Explicit service definitions via action tables
//! - An in-process transport and a moka-backed cache

pub mod broker;
pub mod cache;
pub mod config;
pub mod context;
pub mod event_bus;
pub mod internal;
pub mod middleware;
pub mod service;
pub mod shutdown;
pub mod transport;

// Re-export commonly used types
pub use broker::{Broker, BrokerBuilder, BrokerState, CallOptions};
pub use cache::MemoryCache;
pub use config::{BrokerConfig, CacherConfig, RetryPolicy};
pub use context::{CallContext, RetryState};
pub use event_bus::{EventBus, EventHandler};
pub use internal::NodeService;
pub use middleware::{CachingMiddleware, KeyGenerator, Middleware, RetryMiddleware};
pub use service::{ActionHandler, ActionTable, Service, ServiceContext};
pub use shutdown::ShutdownSignal;
pub use transport::{MemoryBus, MemoryTransport};

pub use servex_common::{Params, Result, ServexError, Value};
