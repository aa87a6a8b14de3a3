//! Main entry point for a Servex node.

use std::time::Duration;

use clap::Parser;
use servex_broker::MemoryBus;
use servex_server::{
    cli::Cli,
    startup::{self, LoggingConfig},
};
use tracing::info;

/// Upper bound for stopping the broker after a signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logging_config = LoggingConfig::from_env();
    if let Some(level) = &cli.log_level {
        logging_config = logging_config.with_level(level);
    }
    let _logging_guard = startup::init_logging(&logging_config)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    let config = cli.broker_config()?;
    info!(node_id = %config.node_id, "Starting Servex node");

    let bus = MemoryBus::new();
    let broker = startup::build_broker(config, &bus)?;
    let signal = startup::wait_for_shutdown_signal();

    broker.start().await?;
    startup::log_startup_summary(&broker);

    startup::shutdown_on_signal(&broker, &signal, SHUTDOWN_TIMEOUT).await;
    Ok(())
}
