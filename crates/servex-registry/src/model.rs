//! Directory records
//!
//! Snapshots of these are handed out by [`crate::ServiceDirectory`]; the live
//! copies never leave the directory lock.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

/// A remote broker instance known to the directory
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    /// Names of services the node last announced
    pub services: IndexSet<String>,
    pub available: bool,
    /// Unix seconds of the last announcement or heartbeat
    pub last_heartbeat: i64,
    /// Unix seconds the node was first registered
    pub registered_at: i64,
}

impl Node {
    pub fn new(id: impl Into<String>, registered_at: i64) -> Self {
        Self {
            id: id.into(),
            services: IndexSet::new(),
            available: true,
            last_heartbeat: registered_at,
            registered_at,
        }
    }

    /// Whether the node has been silent for longer than `timeout_secs` at `now`
    pub fn is_expired(&self, now: i64, timeout_secs: i64) -> bool {
        now - self.last_heartbeat > timeout_secs
    }
}

/// A logical service and every node providing it
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    /// Providing node ids in first-announcement order
    pub nodes: IndexSet<String>,
    /// Short action name to fully qualified action name
    pub actions: IndexMap<String, String>,
    pub events: IndexSet<String>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A fully qualified action (`service.action`) and its providers
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub service: String,
    pub action: String,
    /// Providing node ids in first-announcement order. Round-robin indexes into this.
    pub nodes: IndexSet<String>,
}

impl ActionDescriptor {
    pub fn new(service: &str, action: &str) -> Self {
        Self {
            name: servex_common::full_action_name(service, action),
            service: service.to_string(),
            action: action.to_string(),
            nodes: IndexSet::new(),
        }
    }
}

/// An event name and the nodes with handlers for it
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EventDescriptor {
    pub name: String,
    pub nodes: IndexSet<String>,
}

impl EventDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: IndexSet::new(),
        }
    }
}
