//! Broker configuration
//!
//! One explicit value built at startup and handed to the broker, which passes
//! the relevant parts down to the directory and the built-in middlewares.
//! Sources are layered with the `config` crate: an optional file, then
//! `SERVEX_*` environment variables (`__` separates nested keys, e.g.
//! `SERVEX_REGISTRY__STRATEGY=Random`).

use std::{collections::HashMap, path::Path, time::Duration};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use servex_common::{Result, ServexError, generate_node_id};
use servex_registry::{HealthCheckConfig, RegistryConfig};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SERVEX";

/// Retry policy for the built-in retry middleware
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Maximum number of retries after the first failure
    pub retries: u32,
    /// Base delay in milliseconds
    pub delay: u64,
    /// Upper bound for a single wait in milliseconds
    pub max_delay: u64,
    pub factor: f64,
    /// Actions the policy applies to; empty means all actions
    pub actions: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            retries: 5,
            delay: 100,
            max_delay: 2000,
            factor: 2.0,
            actions: Vec::new(),
        }
    }
}

/// Result caching settings. Caching is off unless this section is present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacherConfig {
    pub ttl_secs: u64,
    /// Actions whose results are cached; empty means all actions
    pub actions: Vec<String>,
}

impl Default for CacherConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            actions: Vec::new(),
        }
    }
}

impl CacherConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub node_id: String,
    pub namespace: String,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub check_interval_secs: u64,
    /// Period of the recurring `node.info` re-announcement
    pub announce_interval_secs: u64,
    /// Overall deadline for a call, including retries
    pub call_timeout_ms: Option<u64>,
    pub registry: RegistryConfig,
    pub retry_policy: RetryPolicy,
    pub cacher: Option<CacherConfig>,
    /// Register the built-in `node` introspection service
    pub internal_services: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            node_id: generate_node_id(),
            namespace: String::new(),
            heartbeat_interval_secs: 5,
            heartbeat_timeout_secs: 30,
            check_interval_secs: 5,
            announce_interval_secs: 30,
            call_timeout_ms: None,
            registry: RegistryConfig::default(),
            retry_policy: RetryPolicy::default(),
            cacher: None,
            internal_services: true,
        }
    }
}

impl BrokerConfig {
    /// Load from an optional file plus `SERVEX_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Same as [`Self::load`] with an explicit environment instead of the process one
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: BrokerConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ServexError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make background loops or backoff meaningless
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(ServexError::Config("node_id must not be empty".to_string()));
        }
        if self.heartbeat_interval_secs == 0
            || self.check_interval_secs == 0
            || self.announce_interval_secs == 0
        {
            return Err(ServexError::Config(
                "heartbeat, check and announce intervals must be greater than zero".to_string(),
            ));
        }
        if self.retry_policy.factor < 1.0 || !self.retry_policy.factor.is_finite() {
            return Err(ServexError::Config(format!(
                "retry factor must be a finite number >= 1, got {}",
                self.retry_policy.factor
            )));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn health_check(&self) -> HealthCheckConfig {
        HealthCheckConfig {
            check_interval: Duration::from_secs(self.check_interval_secs),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use servex_registry::SelectionStrategy;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert!(config.node_id.starts_with("node-"));
        assert_eq!(config.heartbeat_timeout_secs, 30);
        assert_eq!(config.announce_interval(), Duration::from_secs(30));
        assert_eq!(config.registry.strategy, SelectionStrategy::RoundRobin);
        assert!(config.registry.prefer_local);
        assert!(!config.retry_policy.enabled);
        assert_eq!(config.retry_policy.retries, 5);
        assert!(config.cacher.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "node_id: node-a\nregistry:\n  strategy: Random\n  prefer_local: false\nretry_policy:\n  enabled: true\n  retries: 3\ncacher:\n  ttl_secs: 60\n  actions: [math.add]"
        )
        .unwrap();

        let config = BrokerConfig::load_with_env(Some(file.path()), Some(HashMap::new())).unwrap();
        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.registry.strategy, SelectionStrategy::Random);
        assert!(!config.registry.prefer_local);
        assert!(config.retry_policy.enabled);
        assert_eq!(config.retry_policy.retries, 3);
        assert_eq!(config.retry_policy.delay, 100);
        let cacher = config.cacher.unwrap();
        assert_eq!(cacher.ttl(), Duration::from_secs(60));
        assert_eq!(cacher.actions, vec!["math.add".to_string()]);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "node_id: node-a\nheartbeat_timeout_secs: 10").unwrap();

        let env = HashMap::from([
            ("SERVEX_NODE_ID".to_string(), "node-b".to_string()),
            ("SERVEX_REGISTRY__STRATEGY".to_string(), "Random".to_string()),
        ]);
        let config = BrokerConfig::load_with_env(Some(file.path()), Some(env)).unwrap();
        assert_eq!(config.node_id, "node-b");
        assert_eq!(config.heartbeat_timeout_secs, 10);
        assert_eq!(config.registry.strategy, SelectionStrategy::Random);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let result = BrokerConfig::load_with_env(
            Some(Path::new("/nonexistent/servex.yaml")),
            Some(HashMap::new()),
        );
        assert!(matches!(result, Err(ServexError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = BrokerConfig {
            check_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ServexError::Config(_))));

        let config = BrokerConfig {
            announce_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ServexError::Config(_))));
    }
}
