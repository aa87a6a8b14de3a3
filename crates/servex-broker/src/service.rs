//! Service definitions
//!
//! A service declares its actions explicitly through an [`ActionTable`]
//! built once at registration. Handlers receive a [`ServiceContext`] that
//! lets them call other actions and emit events through the owning broker.

use std::{
    future::Future,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use servex_common::{ACTION_SEPARATOR, Params, Result, ServexError, Value};

use crate::broker::{Broker, BrokerInner};

/// Action handler: `(context, params) -> result`
pub type ActionHandler =
    Arc<dyn Fn(ServiceContext, Params) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Action short names mapped to handlers, in declaration order
#[derive(Clone, Default)]
pub struct ActionTable {
    handlers: IndexMap<String, ActionHandler>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action. A later action with the same name replaces the earlier one.
    pub fn action<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ServiceContext, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let boxed: ActionHandler = Arc::new(
            move |ctx: ServiceContext, params: Params| -> BoxFuture<'static, anyhow::Result<Value>> {
                Box::pin(handler(ctx, params))
            },
        );
        self.handlers.insert(name.into(), boxed);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ActionHandler> {
        self.handlers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}

/// A unit of business logic hosted by a broker
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Service name used in action names. Defaults to the type name with a
    /// trailing `Service` removed, lower-cased (`UserService` -> `user`).
    fn name(&self) -> String {
        default_service_name(std::any::type_name::<Self>())
    }

    /// The actions this service exposes
    fn actions(self: Arc<Self>) -> ActionTable;

    /// Event names this service announces to the cluster
    fn events(&self) -> Vec<String> {
        Vec::new()
    }

    async fn created(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn started(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stopped(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Derive a service name from a type path
pub fn default_service_name(type_name: &str) -> String {
    // Drop generic arguments, then keep the last path segment
    let base = type_name.split('<').next().unwrap_or(type_name);
    let short = base.rsplit("::").next().unwrap_or(base);
    let trimmed = match short.strip_suffix("Service") {
        Some(rest) if !rest.is_empty() => rest,
        _ => short,
    };
    trimmed.to_lowercase()
}

/// Handle given to action handlers and lifecycle hooks
#[derive(Clone)]
pub struct ServiceContext {
    broker: Weak<BrokerInner>,
    service_name: String,
    node_id: String,
}

impl ServiceContext {
    pub(crate) fn new(broker: Weak<BrokerInner>, service_name: String, node_id: String) -> Self {
        Self {
            broker,
            service_name,
            node_id,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The owning broker, if it is still alive
    pub fn broker(&self) -> Result<Broker> {
        self.broker
            .upgrade()
            .map(Broker::from_inner)
            .ok_or(ServexError::BrokerUnavailable)
    }

    /// Call an action through the owning broker
    pub async fn call(&self, action: &str, params: Params) -> Result<Value> {
        self.broker()?.call(action, params).await
    }

    /// Emit an event through the owning broker. Names without a separator
    /// are prefixed with the service name (`created` -> `user.created`).
    pub async fn emit(&self, event: &str, data: Params) -> Result<usize> {
        let event = self.qualify_event(event);
        self.broker()?.emit(&event, data).await
    }

    fn qualify_event(&self, event: &str) -> String {
        if event.contains(ACTION_SEPARATOR) {
            event.to_string()
        } else {
            format!("{}{}{}", self.service_name, ACTION_SEPARATOR, event)
        }
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("service_name", &self.service_name)
            .field("node_id", &self.node_id)
            .finish()
    }
}
