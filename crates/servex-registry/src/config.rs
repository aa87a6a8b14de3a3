//! Registry configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::selector::SelectionStrategy;

/// Service directory configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct RegistryConfig {
    /// Load-balancing strategy used when no local provider short-circuits selection
    pub strategy: SelectionStrategy,
    /// Return the local node whenever it is an available provider
    pub prefer_local: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::RoundRobin,
            prefer_local: true,
        }
    }
}

/// Node health sweep configuration
#[derive(Clone, Debug)]
pub struct HealthCheckConfig {
    /// Interval between sweeps (default: 5 seconds)
    pub check_interval: Duration,
    /// Nodes silent for longer than this are marked unavailable (default: 30 seconds)
    pub heartbeat_timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
        }
    }
}
