//! Node health checker service
//!
//! Periodically sweeps the directory and marks nodes whose heartbeat is
//! older than the configured timeout as unavailable. Nodes are never removed
//! here; a later heartbeat or announcement restores them.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{config::HealthCheckConfig, directory::ServiceDirectory};

/// Background heartbeat-timeout sweeper
pub struct NodeHealthChecker {
    config: HealthCheckConfig,
    directory: Arc<ServiceDirectory>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl NodeHealthChecker {
    pub fn new(directory: Arc<ServiceDirectory>, config: HealthCheckConfig) -> Self {
        Self {
            config,
            directory,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Start the sweep loop. Calling it while already running is a no-op.
    pub fn start(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        info!(
            interval_secs = self.config.check_interval.as_secs(),
            timeout_secs = self.config.heartbeat_timeout.as_secs(),
            "Starting node health checker"
        );

        let running = self.running.clone();
        let config = self.config.clone();
        let directory = self.directory.clone();

        let handle = tokio::spawn(async move {
            Self::check_loop(running, config, directory).await;
        });
        *self.handle.lock() = Some(handle);
    }

    /// Stop the sweep loop
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
        info!("Stopped node health checker");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn check_loop(
        running: Arc<AtomicBool>,
        config: HealthCheckConfig,
        directory: Arc<ServiceDirectory>,
    ) {
        let mut ticker = tokio::time::interval(config.check_interval);
        // First tick completes immediately
        ticker.tick().await;

        while running.load(Ordering::SeqCst) {
            ticker.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }

            let expired = directory.check_nodes(config.heartbeat_timeout);
            debug!(
                expired = expired.len(),
                nodes = directory.node_count(),
                "Node health sweep complete"
            );
        }
    }
}

impl Drop for NodeHealthChecker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
