//! Process signal handling
//!
//! Turns Ctrl+C and SIGTERM into a [`ShutdownSignal`] the node waits on.

use std::time::Duration;

use servex_broker::{Broker, ShutdownSignal};
use tracing::{error, info, warn};

/// Listen for Ctrl+C or SIGTERM in the background
///
/// Returns the signal that fires once either arrives.
pub fn wait_for_shutdown_signal() -> ShutdownSignal {
    let shutdown = ShutdownSignal::new();
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        shutdown_clone.shutdown();
    });

    shutdown
}

/// Stop the broker once `signal` fires, giving up after `timeout`
pub async fn shutdown_on_signal(broker: &Broker, signal: &ShutdownSignal, timeout: Duration) {
    signal.wait().await;

    info!(node_id = %broker.node_id(), "Shutdown initiated");
    match tokio::time::timeout(timeout, broker.stop()).await {
        Ok(Ok(())) => info!("Shutdown complete"),
        Ok(Err(e)) => warn!(error = %e, "Broker did not stop cleanly"),
        Err(_) => warn!(timeout = ?timeout, "Broker stop timed out"),
    }
}
