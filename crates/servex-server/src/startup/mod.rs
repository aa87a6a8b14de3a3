//! Application startup utilities

mod logging;
mod node;
mod shutdown;

pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use node::{build_broker, log_startup_summary};
pub use shutdown::{shutdown_on_signal, wait_for_shutdown_signal};
