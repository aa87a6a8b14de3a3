//! Node selection strategies for load balancing
//!
//! Selectors are pure functions over the set of available providers of an
//! action. Round-robin keeps one counter per action name; random keeps no
//! state at all.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Picks one provider out of the available candidates for an action
pub trait NodeSelector: Send + Sync {
    /// Select a node id from `providers`. `None` only when `providers` is empty.
    fn select(&self, providers: &[String], action_name: &str) -> Option<String>;

    /// Strategy name used in logs
    fn name(&self) -> &'static str;
}

/// Built-in selection strategies
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectionStrategy {
    #[default]
    #[serde(alias = "round_robin", alias = "roundrobin", alias = "round-robin")]
    RoundRobin,
    #[serde(alias = "random")]
    Random,
}

impl SelectionStrategy {
    /// Build a fresh selector for this strategy
    pub fn selector(self) -> Box<dyn NodeSelector> {
        match self {
            SelectionStrategy::RoundRobin => Box::new(RoundRobinSelector::new()),
            SelectionStrategy::Random => Box::new(RandomSelector),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::RoundRobin => "RoundRobin",
            SelectionStrategy::Random => "Random",
        }
    }
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "roundrobin" => Ok(SelectionStrategy::RoundRobin),
            "random" => Ok(SelectionStrategy::Random),
            _ => Err(format!("Invalid selection strategy: {}", s)),
        }
    }
}

/// Rotates through providers, one counter per action name
///
/// Picks `providers[counter % len]` then increments the counter. Concurrent
/// callers never lose an increment; strict ordering across callers is not
/// guaranteed.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    counters: DashMap<String, AtomicUsize>,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_index(&self, action_name: &str) -> usize {
        if let Some(counter) = self.counters.get(action_name) {
            return counter.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .entry(action_name.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed)
    }

    /// Current counter value for an action (0 if never selected)
    pub fn counter(&self, action_name: &str) -> usize {
        self.counters
            .get(action_name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl NodeSelector for RoundRobinSelector {
    fn select(&self, providers: &[String], action_name: &str) -> Option<String> {
        if providers.is_empty() {
            return None;
        }
        let index = self.next_index(action_name) % providers.len();
        providers.get(index).cloned()
    }

    fn name(&self) -> &'static str {
        "RoundRobin"
    }
}

/// Uniform random pick with no memory
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl NodeSelector for RandomSelector {
    fn select(&self, providers: &[String], _action_name: &str) -> Option<String> {
        if providers.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..providers.len());
        providers.get(index).cloned()
    }

    fn name(&self) -> &'static str {
        "Random"
    }
}
