//! Service directory
//!
//! Authoritative map of nodes to services, actions and events. All state
//! lives behind one reader/writer lock so a node and its cross-index
//! entries always change together.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use servex_api::{NodeInfo, ServiceInfo};
use servex_common::{Result, ServexError, full_action_name, unix_timestamp};
use tracing::{debug, info, warn};

use crate::{
    config::RegistryConfig,
    model::{ActionDescriptor, EventDescriptor, Node, ServiceDescriptor},
    selector::NodeSelector,
};

#[derive(Debug, Default)]
pub(crate) struct DirectoryState {
    pub(crate) nodes: IndexMap<String, Node>,
    /// Latest service list announced by each node; source for rebuilding service descriptors
    pub(crate) announcements: HashMap<String, Vec<ServiceInfo>>,
    pub(crate) services: IndexMap<String, ServiceDescriptor>,
    pub(crate) actions: IndexMap<String, ActionDescriptor>,
    pub(crate) events: IndexMap<String, EventDescriptor>,
}

impl DirectoryState {
    /// Replace the announced service list of `node_id`, keeping positions of
    /// memberships that survive so round-robin order stays stable.
    fn apply(&mut self, node_id: &str, services: &[ServiceInfo]) {
        let mut wanted_services: IndexSet<&str> = IndexSet::new();
        let mut wanted_actions: HashSet<String> = HashSet::new();
        let mut wanted_events: HashSet<&str> = HashSet::new();
        for svc in services.iter().filter(|s| !s.name.is_empty()) {
            wanted_services.insert(svc.name.as_str());
            for action in svc.actions.iter().filter(|a| !a.is_empty()) {
                wanted_actions.insert(full_action_name(&svc.name, action));
            }
            for event in svc.events.iter().filter(|e| !e.is_empty()) {
                wanted_events.insert(event.as_str());
            }
        }

        self.actions.retain(|name, descriptor| {
            if !wanted_actions.contains(name) {
                descriptor.nodes.shift_remove(node_id);
            }
            !descriptor.nodes.is_empty()
        });
        self.events.retain(|name, descriptor| {
            if !wanted_events.contains(name.as_str()) {
                descriptor.nodes.shift_remove(node_id);
            }
            !descriptor.nodes.is_empty()
        });

        let mut affected: IndexSet<String> = IndexSet::new();
        for (name, descriptor) in self.services.iter_mut() {
            if descriptor.nodes.contains(node_id) && !wanted_services.contains(name.as_str()) {
                descriptor.nodes.shift_remove(node_id);
                affected.insert(name.clone());
            }
        }

        for svc in services.iter().filter(|s| !s.name.is_empty()) {
            self.services
                .entry(svc.name.clone())
                .or_insert_with(|| ServiceDescriptor::new(&svc.name))
                .nodes
                .insert(node_id.to_string());

            for action in svc.actions.iter().filter(|a| !a.is_empty()) {
                self.actions
                    .entry(full_action_name(&svc.name, action))
                    .or_insert_with(|| ActionDescriptor::new(&svc.name, action))
                    .nodes
                    .insert(node_id.to_string());
            }
            for event in svc.events.iter().filter(|e| !e.is_empty()) {
                self.events
                    .entry(event.clone())
                    .or_insert_with(|| EventDescriptor::new(event))
                    .nodes
                    .insert(node_id.to_string());
            }
            affected.insert(svc.name.clone());
        }

        if services.is_empty() {
            self.announcements.remove(node_id);
        } else {
            self.announcements
                .insert(node_id.to_string(), services.to_vec());
        }

        for name in &affected {
            self.reindex_service(name);
        }
    }

    /// Rebuild the action/event mapping of a service from its remaining
    /// providers, dropping the descriptor once no node provides it.
    fn reindex_service(&mut self, name: &str) {
        let Some(descriptor) = self.services.get_mut(name) else {
            return;
        };
        if descriptor.nodes.is_empty() {
            self.services.shift_remove(name);
            return;
        }

        let mut actions = IndexMap::new();
        let mut events = IndexSet::new();
        for node_id in &descriptor.nodes {
            let Some(announced) = self.announcements.get(node_id) else {
                continue;
            };
            for svc in announced.iter().filter(|s| s.name == name) {
                for action in svc.actions.iter().filter(|a| !a.is_empty()) {
                    actions.insert(action.clone(), full_action_name(name, action));
                }
                for event in svc.events.iter().filter(|e| !e.is_empty()) {
                    events.insert(event.clone());
                }
            }
        }
        descriptor.actions = actions;
        descriptor.events = events;
    }

    fn is_available(&self, node_id: &str) -> bool {
        self.nodes.get(node_id).is_some_and(|n| n.available)
    }
}

/// Cluster topology and per-action node selection
pub struct ServiceDirectory {
    config: RegistryConfig,
    selector: Box<dyn NodeSelector>,
    state: RwLock<DirectoryState>,
}

impl ServiceDirectory {
    pub fn new(config: RegistryConfig) -> Self {
        let selector = config.strategy.selector();
        Self::with_selector(config, selector)
    }

    /// Use a custom selector instead of the configured strategy
    pub fn with_selector(config: RegistryConfig, selector: Box<dyn NodeSelector>) -> Self {
        Self {
            config,
            selector,
            state: RwLock::new(DirectoryState::default()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn selector_name(&self) -> &'static str {
        self.selector.name()
    }

    /// Upsert a node from its announcement. Re-registering replaces the
    /// node's previous service list. Returns true when the node was not known.
    pub fn register_node(&self, node_id: &str, info: &NodeInfo) -> bool {
        self.register_node_at(node_id, info, unix_timestamp())
    }

    pub fn register_node_at(&self, node_id: &str, info: &NodeInfo, now: i64) -> bool {
        if node_id.is_empty() {
            warn!("Ignoring node registration without a node id");
            return false;
        }

        let is_new = {
            let mut state = self.state.write();
            let is_new = !state.nodes.contains_key(node_id);
            let registered_at = if info.timestamp > 0 {
                info.timestamp
            } else {
                now
            };
            let node = state
                .nodes
                .entry(node_id.to_string())
                .or_insert_with(|| Node::new(node_id, registered_at));
            node.available = true;
            node.last_heartbeat = now;
            node.services = info
                .services
                .iter()
                .filter(|s| !s.name.is_empty())
                .map(|s| s.name.clone())
                .collect();
            state.apply(node_id, &info.services);
            is_new
        };

        if is_new {
            info!(
                node_id = %node_id,
                services = info.services.len(),
                "Node registered"
            );
        } else {
            debug!(
                node_id = %node_id,
                services = info.services.len(),
                "Node re-registered"
            );
        }
        is_new
    }

    /// Remove a node and prune it from every index. Returns whether the node was known.
    pub fn deregister_node(&self, node_id: &str) -> bool {
        let removed = {
            let mut state = self.state.write();
            if state.nodes.shift_remove(node_id).is_some() {
                state.apply(node_id, &[]);
                true
            } else {
                false
            }
        };

        if removed {
            info!(node_id = %node_id, "Node deregistered");
        }
        removed
    }

    /// Refresh liveness of a known node. Unknown ids are ignored.
    pub fn heartbeat(&self, node_id: &str) -> bool {
        self.heartbeat_at(node_id, unix_timestamp())
    }

    pub fn heartbeat_at(&self, node_id: &str, now: i64) -> bool {
        let mut state = self.state.write();
        match state.nodes.get_mut(node_id) {
            Some(node) => {
                if !node.available {
                    info!(node_id = %node_id, "Node available again");
                }
                node.last_heartbeat = now;
                node.available = true;
                true
            }
            None => {
                debug!(node_id = %node_id, "Heartbeat from unknown node ignored");
                false
            }
        }
    }

    /// Mark nodes silent for longer than `timeout` as unavailable
    pub fn check_nodes(&self, timeout: Duration) -> Vec<String> {
        self.check_nodes_at(unix_timestamp(), timeout.as_secs() as i64)
    }

    /// Sweep with an explicit clock. Returns ids that transitioned to unavailable.
    pub fn check_nodes_at(&self, now: i64, timeout_secs: i64) -> Vec<String> {
        let mut expired = Vec::new();
        let mut state = self.state.write();
        for node in state.nodes.values_mut() {
            if node.is_expired(now, timeout_secs) {
                if node.available {
                    expired.push(node.id.clone());
                }
                node.available = false;
            }
        }
        drop(state);

        for node_id in &expired {
            warn!(
                node_id = %node_id,
                timeout_secs = timeout_secs,
                "Node heartbeat timeout, marking unavailable"
            );
        }
        expired
    }

    /// Select a provider for `action_name`, or `None` when the action is
    /// unknown or has no available provider.
    pub fn get_node_for_action(&self, action_name: &str, local_node_id: Option<&str>) -> Option<String> {
        self.resolve_action(action_name, local_node_id).ok()
    }

    /// Like [`Self::get_node_for_action`] but tells the two failure cases apart
    pub fn resolve_action(&self, action_name: &str, local_node_id: Option<&str>) -> Result<String> {
        let providers: Vec<String> = {
            let state = self.state.read();
            let descriptor = state
                .actions
                .get(action_name)
                .ok_or_else(|| ServexError::ActionNotFound(action_name.to_string()))?;
            descriptor
                .nodes
                .iter()
                .filter(|id| state.is_available(id))
                .cloned()
                .collect()
        };

        if providers.is_empty() {
            return Err(ServexError::NoAvailableNode(action_name.to_string()));
        }

        if self.config.prefer_local
            && let Some(local) = local_node_id
            && providers.iter().any(|id| id == local)
        {
            return Ok(local.to_string());
        }

        self.selector
            .select(&providers, action_name)
            .ok_or_else(|| ServexError::NoAvailableNode(action_name.to_string()))
    }

    /// All available nodes subscribed to `event_name`
    pub fn get_nodes_for_event(&self, event_name: &str) -> Vec<String> {
        let state = self.state.read();
        state
            .events
            .get(event_name)
            .map(|descriptor| {
                descriptor
                    .nodes
                    .iter()
                    .filter(|id| state.is_available(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn node(&self, node_id: &str) -> Option<Node> {
        self.state.read().nodes.get(node_id).cloned()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.state.read().nodes.values().cloned().collect()
    }

    pub fn services(&self) -> Vec<ServiceDescriptor> {
        self.state.read().services.values().cloned().collect()
    }

    pub fn actions(&self) -> Vec<ActionDescriptor> {
        self.state.read().actions.values().cloned().collect()
    }

    pub fn events(&self) -> Vec<EventDescriptor> {
        self.state.read().events.values().cloned().collect()
    }

    pub fn has_action(&self, action_name: &str) -> bool {
        self.state.read().actions.contains_key(action_name)
    }

    pub fn is_node_available(&self, node_id: &str) -> bool {
        self.state.read().is_available(node_id)
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    #[cfg(test)]
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&DirectoryState) -> R) -> R {
        f(&self.state.read())
    }
}

impl std::fmt::Debug for ServiceDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDirectory")
            .field("config", &self.config)
            .field("selector", &self.selector.name())
            .field("nodes", &self.node_count())
            .finish()
    }
}
