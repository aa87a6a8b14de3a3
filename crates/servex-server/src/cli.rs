//! Command line interface
//!
//! Flags override the values loaded from the configuration file and the
//! `SERVEX_*` environment.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use servex_broker::BrokerConfig;
use servex_registry::SelectionStrategy;

#[derive(Debug, Parser)]
#[command(name = "servex", version, about = "Servex service broker node")]
pub struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long = "config", env = "SERVEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Node identifier, generated when absent
    #[arg(long = "node-id", env = "SERVEX_NODE_ID")]
    pub node_id: Option<String>,

    /// Provider selection strategy (round-robin, random)
    #[arg(long = "strategy")]
    pub strategy: Option<SelectionStrategy>,

    /// Console log level
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Load the broker configuration and apply the command line overrides
    pub fn broker_config(&self) -> anyhow::Result<BrokerConfig> {
        let mut config = BrokerConfig::load(self.config.as_deref()).with_context(|| {
            match &self.config {
                Some(path) => format!("failed to load configuration from {}", path.display()),
                None => "failed to load configuration from the environment".to_string(),
            }
        })?;
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut BrokerConfig) {
        if let Some(node_id) = &self.node_id {
            config.node_id = node_id.clone();
        }
        if let Some(strategy) = self.strategy {
            config.registry.strategy = strategy;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "servex",
            "-c",
            "conf/servex.yaml",
            "--node-id",
            "node-1",
            "--strategy",
            "random",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("conf/servex.yaml")));
        assert_eq!(cli.node_id.as_deref(), Some("node-1"));
        assert_eq!(cli.strategy, Some(SelectionStrategy::Random));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        let result = Cli::try_parse_from(["servex", "--strategy", "fastest"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "node_id: from-file\nregistry:\n  strategy: RoundRobin").unwrap();

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            node_id: Some("from-cli".to_string()),
            strategy: Some(SelectionStrategy::Random),
            log_level: None,
        };
        let config = cli.broker_config().unwrap();

        assert_eq!(config.node_id, "from-cli");
        assert_eq!(config.registry.strategy, SelectionStrategy::Random);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/servex.yaml")),
            node_id: None,
            strategy: None,
            log_level: None,
        };
        assert!(cli.broker_config().is_err());
    }
}
