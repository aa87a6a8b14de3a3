//! Broker orchestrator
//!
//! Owns the service directory, the event bus, the middleware chain and the
//! handles to the external transport and cache. Decides for every call
//! whether it is answered locally, by a middleware, or by a remote node.

use std::{
    any::{Any, TypeId},
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use servex_api::{
    EventPayload, HeartbeatPayload, NodeInfo, ServiceInfo, TOPIC_EVENT, TOPIC_HEARTBEAT,
    TOPIC_NODE_INFO, decode, encode,
};
use servex_common::{Cache, Params, Result, ServexError, Transport, Value, split_action_name};
use servex_registry::{NodeHealthChecker, NodeSelector, ServiceDirectory};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    config::BrokerConfig,
    context::CallContext,
    event_bus::EventBus,
    internal::NodeService,
    middleware::{self, CachingMiddleware, Middleware, RetryMiddleware},
    service::{ActionHandler, ActionTable, Service, ServiceContext},
    shutdown::ShutdownSignal,
};

/// Broker lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerState {
    Constructed,
    Started,
    Stopped,
}

impl std::fmt::Display for BrokerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BrokerState::Constructed => "constructed",
            BrokerState::Started => "started",
            BrokerState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Per-call options
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    /// Overall deadline including retries; overrides the configured call timeout
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[derive(Clone)]
struct RegisteredService {
    type_id: TypeId,
    name: String,
    service: Arc<dyn Service>,
    instance: Arc<dyn Any + Send + Sync>,
    actions: ActionTable,
    events: Vec<String>,
}

impl RegisteredService {
    fn info(&self) -> ServiceInfo {
        ServiceInfo::new(&self.name)
            .with_actions(self.actions.names())
            .with_events(self.events.iter().cloned())
    }
}

pub(crate) struct BrokerInner {
    config: BrokerConfig,
    registry: Arc<ServiceDirectory>,
    event_bus: Arc<EventBus>,
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<dyn Cache>>,
    services: RwLock<Vec<RegisteredService>>,
    state: Mutex<BrokerState>,
    shutdown: ShutdownSignal,
    health_checker: NodeHealthChecker,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    started_at: Mutex<Option<Instant>>,
}

impl Drop for BrokerInner {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat_task.get_mut().take() {
            handle.abort();
        }
    }
}

/// Builder for [`Broker`]
pub struct BrokerBuilder {
    config: BrokerConfig,
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<dyn Cache>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    selector: Option<Box<dyn NodeSelector>>,
}

impl BrokerBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Append a middleware after the built-in ones
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Replace the configured selection strategy
    pub fn selector(mut self, selector: Box<dyn NodeSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn build(self) -> Result<Broker> {
        let BrokerBuilder {
            config,
            transport,
            cache,
            middlewares,
            selector,
        } = self;
        config.validate()?;

        let registry = Arc::new(match selector {
            Some(selector) => ServiceDirectory::with_selector(config.registry.clone(), selector),
            None => ServiceDirectory::new(config.registry.clone()),
        });
        let health_checker = NodeHealthChecker::new(registry.clone(), config.health_check());

        let mut chain: Vec<Arc<dyn Middleware>> = Vec::new();
        match (&config.cacher, &cache) {
            (Some(cacher), Some(cache)) => {
                chain.push(Arc::new(CachingMiddleware::from_config(cache.clone(), cacher)));
            }
            (Some(_), None) => {
                warn!("Cacher configured without a cache backend, result caching disabled");
            }
            _ => {}
        }
        if config.retry_policy.enabled {
            chain.push(Arc::new(RetryMiddleware::new(config.retry_policy.clone())));
        }
        chain.extend(middlewares);

        let internal_services = config.internal_services;
        let broker = Broker {
            inner: Arc::new(BrokerInner {
                config,
                registry,
                event_bus: Arc::new(EventBus::new()),
                middlewares: RwLock::new(chain),
                transport,
                cache,
                services: RwLock::new(Vec::new()),
                state: Mutex::new(BrokerState::Constructed),
                shutdown: ShutdownSignal::new(),
                health_checker,
                heartbeat_task: Mutex::new(None),
                started_at: Mutex::new(None),
            }),
        };

        if internal_services {
            broker.create_service(NodeService)?;
        }

        info!(
            node_id = %broker.node_id(),
            strategy = %broker.inner.registry.selector_name(),
            middlewares = broker.inner.middlewares.read().len(),
            "Broker created"
        );
        Ok(broker)
    }
}

/// Service broker handle. Cheap to clone; all clones share one broker.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn builder(config: BrokerConfig) -> BrokerBuilder {
        BrokerBuilder {
            config,
            transport: None,
            cache: None,
            middlewares: Vec::new(),
            selector: None,
        }
    }

    /// Broker without transport or cache
    pub fn new(config: BrokerConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub(crate) fn from_inner(inner: Arc<BrokerInner>) -> Self {
        Self { inner }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.config.node_id
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> BrokerState {
        *self.inner.state.lock()
    }

    pub fn registry(&self) -> &Arc<ServiceDirectory> {
        &self.inner.registry
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.event_bus
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.inner.cache.as_ref()
    }

    pub fn transport(&self) -> Option<&Arc<dyn Transport>> {
        self.inner.transport.as_ref()
    }

    /// Time since `start`, `None` unless started
    pub fn uptime(&self) -> Option<Duration> {
        if self.state() != BrokerState::Started {
            return None;
        }
        let started_at = *self.inner.started_at.lock();
        started_at.map(|at| at.elapsed())
    }

    /// Append a middleware to the end of the chain
    pub fn use_middleware<M: Middleware + 'static>(&self, middleware: M) -> &Self {
        debug!(middleware = %middleware.name(), "Middleware added");
        self.inner.middlewares.write().push(Arc::new(middleware));
        self
    }

    /// Register a local service. A service of the same type replaces the
    /// earlier registration.
    pub fn create_service<S: Service>(&self, service: S) -> Result<()> {
        let state = self.state();
        if state == BrokerState::Stopped {
            return Err(ServexError::InvalidState(format!(
                "cannot register a service on a {} broker",
                state
            )));
        }

        let service = Arc::new(service);
        let name = service.name();
        let registered = RegisteredService {
            type_id: TypeId::of::<S>(),
            name: name.clone(),
            service: service.clone(),
            instance: service.clone(),
            actions: service.clone().actions(),
            events: service.events(),
        };
        let action_count = registered.actions.len();

        {
            let mut services = self.inner.services.write();
            match services.iter_mut().find(|s| s.type_id == registered.type_id) {
                Some(existing) => {
                    warn!(service = %name, "Service type registered twice, replacing");
                    *existing = registered;
                }
                None => services.push(registered),
            }
        }
        info!(service = %name, actions = action_count, "Service registered");

        // Late registration: run the hooks and re-announce
        if state == BrokerState::Started
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let broker = self.clone();
            let service: Arc<dyn Service> = service;
            handle.spawn(async move {
                let ctx = broker.service_context(&name);
                if let Err(e) = service.created(&ctx).await {
                    error!(service = %name, error = %e, "Service created hook failed");
                }
                if let Err(e) = service.started(&ctx).await {
                    error!(service = %name, error = %e, "Service started hook failed");
                }
                broker.broadcast_node_info().await;
            });
        }
        Ok(())
    }

    /// Announcements for every local service
    pub fn services(&self) -> Vec<ServiceInfo> {
        self.inner
            .services
            .read()
            .iter()
            .map(RegisteredService::info)
            .collect()
    }

    /// Look up a local service by name (case-insensitive)
    pub fn get_service(&self, name: &str) -> Result<Arc<dyn Service>> {
        self.inner
            .services
            .read()
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s.service.clone())
            .ok_or_else(|| ServexError::ServiceNotRegistered(name.to_string()))
    }

    /// Look up a local service by its type
    pub fn service<S: Service>(&self) -> Option<Arc<S>> {
        let instance = self
            .inner
            .services
            .read()
            .iter()
            .find(|s| s.type_id == TypeId::of::<S>())
            .map(|s| s.instance.clone())?;
        instance.downcast::<S>().ok()
    }

    fn service_context(&self, service_name: &str) -> ServiceContext {
        ServiceContext::new(
            Arc::downgrade(&self.inner),
            service_name.to_string(),
            self.node_id().to_string(),
        )
    }

    fn lifecycle_targets(&self) -> Vec<(String, Arc<dyn Service>)> {
        self.inner
            .services
            .read()
            .iter()
            .map(|s| (s.name.clone(), s.service.clone()))
            .collect()
    }

    fn transition(&self, from: BrokerState, to: BrokerState) -> Result<()> {
        let mut state = self.inner.state.lock();
        if *state != from {
            return Err(ServexError::InvalidState(format!(
                "cannot move from {} to {}",
                *state, to
            )));
        }
        *state = to;
        Ok(())
    }

    /// Run `created` hooks, connect the transport, subscribe to cluster
    /// topics, announce this node and run `started` hooks.
    pub async fn start(&self) -> Result<()> {
        self.transition(BrokerState::Constructed, BrokerState::Started)?;
        info!(node_id = %self.node_id(), "Broker starting");

        if let Err(e) = self.start_components().await {
            error!(node_id = %self.node_id(), error = %e, "Broker failed to start");
            if let Some(handle) = self.inner.heartbeat_task.lock().take() {
                handle.abort();
            }
            self.inner.health_checker.stop();
            if let Some(transport) = &self.inner.transport {
                let _ = transport.disconnect().await;
            }
            *self.inner.state.lock() = BrokerState::Constructed;
            return Err(e);
        }

        *self.inner.started_at.lock() = Some(Instant::now());
        info!(
            node_id = %self.node_id(),
            services = self.inner.services.read().len(),
            "Broker started successfully"
        );
        Ok(())
    }

    async fn start_components(&self) -> Result<()> {
        let targets = self.lifecycle_targets();
        for (name, service) in &targets {
            let ctx = self.service_context(name);
            service.created(&ctx).await.map_err(|e| {
                ServexError::Handler(e.context(format!("service '{}' created hook failed", name)))
            })?;
        }

        if let Some(transport) = &self.inner.transport {
            transport.connect().await?;
            self.install_request_handler(transport.as_ref());
            self.subscribe_topics(transport.as_ref());
            self.broadcast_node_info().await;
            self.start_heartbeat(transport.clone());
        }
        self.inner.health_checker.start();

        info!("Starting services...");
        for (name, service) in &targets {
            let ctx = self.service_context(name);
            service.started(&ctx).await.map_err(|e| {
                ServexError::Handler(e.context(format!("service '{}' started hook failed", name)))
            })?;
        }
        Ok(())
    }

    /// Run `stopped` hooks, halt background loops and disconnect the transport.
    /// Pending retry backoffs are cancelled.
    pub async fn stop(&self) -> Result<()> {
        self.transition(BrokerState::Started, BrokerState::Stopped)?;
        info!(node_id = %self.node_id(), "Broker stopping...");

        self.inner.shutdown.shutdown();
        if let Some(handle) = self.inner.heartbeat_task.lock().take() {
            handle.abort();
        }
        self.inner.health_checker.stop();

        for (name, service) in self.lifecycle_targets() {
            let ctx = self.service_context(&name);
            if let Err(e) = service.stopped(&ctx).await {
                error!(service = %name, error = %e, "Service stopped hook failed");
            }
        }

        if let Some(transport) = &self.inner.transport
            && let Err(e) = transport.disconnect().await
        {
            warn!(error = %e, "Failed to disconnect transport");
        }

        info!(node_id = %self.node_id(), "Broker stopped");
        Ok(())
    }

    fn install_request_handler(&self, transport: &dyn Transport) {
        let weak: Weak<BrokerInner> = Arc::downgrade(&self.inner);
        transport.set_request_handler(Arc::new(
            move |action: String, params: Params| -> BoxFuture<'static, Result<Value>> {
                let weak = weak.clone();
                Box::pin(async move {
                    match weak.upgrade() {
                        Some(inner) => Broker::from_inner(inner).call_local(&action, params).await,
                        None => Err(ServexError::BrokerUnavailable),
                    }
                })
            },
        ));
    }

    fn subscribe_topics(&self, transport: &dyn Transport) {
        let weak = Arc::downgrade(&self.inner);
        transport.subscribe(
            TOPIC_NODE_INFO,
            Arc::new(move |payload| {
                if let Some(inner) = weak.upgrade() {
                    Broker::from_inner(inner).handle_node_info(payload);
                }
            }),
        );

        let weak = Arc::downgrade(&self.inner);
        transport.subscribe(
            TOPIC_HEARTBEAT,
            Arc::new(move |payload| {
                if let Some(inner) = weak.upgrade() {
                    Broker::from_inner(inner).handle_heartbeat(payload);
                }
            }),
        );

        let weak = Arc::downgrade(&self.inner);
        transport.subscribe(
            TOPIC_EVENT,
            Arc::new(move |payload| {
                if let Some(inner) = weak.upgrade() {
                    Broker::from_inner(inner).handle_event(payload);
                }
            }),
        );
    }

    fn handle_node_info(&self, payload: Value) {
        let info: NodeInfo = match decode(payload) {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "Dropping malformed node.info payload");
                return;
            }
        };
        let sender = if info.sender.is_empty() {
            info.node_id.clone()
        } else {
            info.sender.clone()
        };
        if sender.is_empty() || sender == self.node_id() {
            return;
        }

        let is_new = self.inner.registry.register_node(&sender, &info);

        // Answer a newcomer with our own announcement so it learns about us
        if is_new && let Ok(handle) = tokio::runtime::Handle::try_current() {
            let broker = self.clone();
            handle.spawn(async move {
                broker.broadcast_node_info().await;
            });
        }
    }

    fn handle_heartbeat(&self, payload: Value) {
        match decode::<HeartbeatPayload>(payload) {
            Ok(heartbeat) if heartbeat.sender != self.node_id() => {
                self.inner.registry.heartbeat(&heartbeat.sender);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Dropping malformed heartbeat payload"),
        }
    }

    fn handle_event(&self, payload: Value) {
        match decode::<EventPayload>(payload) {
            Ok(event) if event.sender != self.node_id() => {
                debug!(event = %event.event, sender = %event.sender, "Received remote event");
                self.inner.event_bus.emit(&event.event, &event.data);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Dropping malformed event payload"),
        }
    }

    /// Announce the local services on `node.info`
    pub async fn broadcast_node_info(&self) {
        let Some(transport) = &self.inner.transport else {
            return;
        };
        if !transport.is_connected() {
            return;
        }

        let info = NodeInfo::new(self.node_id(), self.services());
        let payload = match encode(&info) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode node info");
                return;
            }
        };
        match transport.broadcast(TOPIC_NODE_INFO, payload).await {
            Ok(()) => debug!(services = info.services.len(), "Node info broadcast"),
            Err(e) => warn!(error = %e, "Failed to broadcast node info"),
        }
    }

    /// Broadcast `heartbeat` every heartbeat interval and re-announce the
    /// node every announce interval, so peers that missed an earlier
    /// `node.info` converge on the next cycle.
    fn start_heartbeat(&self, transport: Arc<dyn Transport>) {
        let heartbeat_interval = self.inner.config.heartbeat_interval();
        let announce_interval = self.inner.config.announce_interval();
        let node_id = self.node_id().to_string();
        let shutdown = self.inner.shutdown.clone();
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(heartbeat_interval);
            let mut announce = tokio::time::interval(announce_interval);
            heartbeat.tick().await;
            announce.tick().await;
            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        let payload = match encode(&HeartbeatPayload::new(&node_id)) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(error = %e, "Failed to encode heartbeat");
                                continue;
                            }
                        };
                        if let Err(e) = transport.broadcast(TOPIC_HEARTBEAT, payload).await {
                            warn!(error = %e, "Failed to broadcast heartbeat");
                        }
                    }
                    _ = announce.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        Broker::from_inner(inner).broadcast_node_info().await;
                    }
                    _ = shutdown.wait() => break,
                }
            }
            debug!(node_id = %node_id, "Heartbeat emitter stopped");
        });
        *self.inner.heartbeat_task.lock() = Some(handle);
    }

    /// Call an action with the configured call timeout
    pub async fn call(&self, action: &str, params: Params) -> Result<Value> {
        self.call_with(action, params, CallOptions::default()).await
    }

    pub async fn call_with(&self, action: &str, params: Params, options: CallOptions) -> Result<Value> {
        split_action_name(action)?;
        debug!(action = %action, "Call action");

        match options.timeout.or_else(|| self.inner.config.call_timeout()) {
            Some(limit) => tokio::time::timeout(limit, self.dispatch(action, params))
                .await
                .map_err(|_| ServexError::Timeout {
                    action: action.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                })?,
            None => self.dispatch(action, params).await,
        }
    }

    async fn dispatch(&self, action: &str, params: Params) -> Result<Value> {
        let mut ctx = CallContext::new(action, params, self.node_id());
        let chain: Vec<Arc<dyn Middleware>> = self.inner.middlewares.read().clone();

        for middleware in &chain {
            middleware.process(&mut ctx).await?;
            if let Some(result) = ctx.result.take() {
                debug!(action = %action, middleware = %middleware.name(), "Call answered by middleware");
                return Ok(result);
            }
        }

        loop {
            match self.invoke(&ctx).await {
                Ok(result) => {
                    for middleware in &chain {
                        middleware.after_call(&ctx, &result).await;
                    }
                    return Ok(result);
                }
                Err(err) => {
                    let Some(state) = ctx.retry_state.as_mut() else {
                        return Err(err);
                    };
                    middleware::handle_error(state, &ctx.action, err, &self.inner.shutdown).await?;
                }
            }
        }
    }

    async fn invoke(&self, ctx: &CallContext) -> Result<Value> {
        if let Some((handler, service_ctx)) = self.local_handler(&ctx.action)? {
            debug!(action = %ctx.action, "Invoking local action");
            return handler(service_ctx, ctx.params.clone())
                .await
                .map_err(handler_error);
        }

        let target = self
            .inner
            .registry
            .resolve_action(&ctx.action, Some(self.node_id()))?;
        let transport = match &self.inner.transport {
            Some(transport) if transport.is_connected() => transport,
            _ => return Err(ServexError::TransportUnavailable),
        };

        debug!(action = %ctx.action, node_id = %target, "Forwarding call to remote node");
        transport.call(&target, &ctx.action, ctx.params.clone()).await
    }

    /// Answer a call with local handlers only. Used for calls arriving from
    /// other nodes; never forwarded and never passed through middleware.
    pub async fn call_local(&self, action: &str, params: Params) -> Result<Value> {
        let (handler, service_ctx) = self
            .local_handler(action)?
            .ok_or_else(|| ServexError::ActionNotFound(action.to_string()))?;
        debug!(action = %action, "Answering call locally");
        handler(service_ctx, params).await.map_err(handler_error)
    }

    fn local_handler(&self, action: &str) -> Result<Option<(ActionHandler, ServiceContext)>> {
        let (service_name, action_name) = split_action_name(action)?;
        let found = self
            .inner
            .services
            .read()
            .iter()
            .filter(|s| s.name.eq_ignore_ascii_case(service_name))
            .find_map(|s| {
                s.actions
                    .get(action_name)
                    .map(|handler| (handler.clone(), s.name.clone()))
            });
        Ok(found.map(|(handler, name)| (handler, self.service_context(&name))))
    }

    /// Dispatch an event to local handlers and broadcast it to the cluster.
    /// Returns the number of local handlers that succeeded.
    pub async fn emit(&self, event: &str, data: Params) -> Result<usize> {
        let delivered = self.inner.event_bus.emit(event, &data);

        if let Some(transport) = &self.inner.transport
            && transport.is_connected()
        {
            let payload = encode(&EventPayload::new(self.node_id(), event, data))?;
            if let Err(e) = transport.broadcast(TOPIC_EVENT, payload).await {
                warn!(event = %event, error = %e, "Failed to broadcast event");
            }
        }
        Ok(delivered)
    }

    /// Subscribe a local handler to an event
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Params) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.event_bus.on(event, handler);
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("node_id", &self.node_id())
            .field("state", &self.state())
            .finish()
    }
}

/// Surface broker errors raised inside a handler unchanged
fn handler_error(err: anyhow::Error) -> ServexError {
    match err.downcast::<ServexError>() {
        Ok(err) => err,
        Err(err) => ServexError::Handler(err),
    }
}
