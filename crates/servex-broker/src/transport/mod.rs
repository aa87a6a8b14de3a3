//! Transport implementations shipped with the broker
//!
//! Wire transports live outside this crate and implement
//! [`servex_common::Transport`]. The in-memory one connects brokers that run
//! in the same process.

mod memory;

pub use memory::{MemoryBus, MemoryTransport};
