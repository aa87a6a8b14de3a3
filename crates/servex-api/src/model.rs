// Cluster topic payloads
// This file defines the messages exchanged between brokers over the transport

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use servex_common::{Params, Result, Value, unix_timestamp};

// Reserved topic names
pub const TOPIC_NODE_INFO: &str = "node.info";
pub const TOPIC_HEARTBEAT: &str = "heartbeat";
pub const TOPIC_EVENT: &str = "event";

/// All reserved topics a broker subscribes to on start
pub const RESERVED_TOPICS: [&str; 3] = [TOPIC_NODE_INFO, TOPIC_HEARTBEAT, TOPIC_EVENT];

/// A service as announced by a node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceInfo {
    pub name: String,
    pub actions: Vec<String>,
    pub events: Vec<String>,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }
}

// node.info payload
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeInfo {
    pub sender: String,
    #[serde(rename = "nodeID")]
    pub node_id: String,
    pub services: Vec<ServiceInfo>,
    /// Unix seconds at which the announcement was produced
    pub timestamp: i64,
}

impl NodeInfo {
    /// Announcement sent by `node_id` about itself
    pub fn new(node_id: impl Into<String>, services: Vec<ServiceInfo>) -> Self {
        let node_id = node_id.into();
        Self {
            sender: node_id.clone(),
            node_id,
            services,
            timestamp: unix_timestamp(),
        }
    }
}

// heartbeat payload
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatPayload {
    pub sender: String,
}

impl HeartbeatPayload {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

// event payload
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPayload {
    pub sender: String,
    pub event: String,
    pub data: Params,
}

impl EventPayload {
    pub fn new(sender: impl Into<String>, event: impl Into<String>, data: Params) -> Self {
        Self {
            sender: sender.into(),
            event: event.into(),
            data,
        }
    }
}

/// Encode a payload into the dynamic value handed to the transport
pub fn encode<T: Serialize>(payload: &T) -> Result<Value> {
    Ok(serde_json::to_value(payload)?)
}

/// Decode a payload received from the transport
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}
