//! Servex API - Cluster wire payloads
//!
//! Typed messages for the reserved transport topics (`node.info`,
//! `heartbeat`, `event`).

pub mod model;

pub use model::{
    EventPayload, HeartbeatPayload, NodeInfo, RESERVED_TOPICS, ServiceInfo, TOPIC_EVENT,
    TOPIC_HEARTBEAT, TOPIC_NODE_INFO, decode, encode,
};
