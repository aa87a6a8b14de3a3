//! Servex Registry - Cluster topology and load balancing
//!
//! This crate provides:
//! - The service directory (nodes, services, actions, events)
//! - Node health tracking with a periodic heartbeat-timeout sweep
//! - Round-robin and random provider selection

pub mod config;
pub mod directory;
pub mod health_checker;
pub mod model;
pub mod selector;

// Re-export commonly used types
pub use config::{HealthCheckConfig, RegistryConfig};
pub use directory::ServiceDirectory;
pub use health_checker::NodeHealthChecker;
pub use model::{ActionDescriptor, EventDescriptor, Node, ServiceDescriptor};
pub use selector::{NodeSelector, RandomSelector, RoundRobinSelector, SelectionStrategy};
