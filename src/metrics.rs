//! Process-wide named counters.
//!
//! Counters are monotonically increasing and shared by every session.
//! Exposition is a stable `name value` mapping; how it is scraped is up
//! to the caller.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Completed response writes.
pub const SENT: &str = "sent";
/// Dispatched requests.
pub const REQUESTS: &str = "requests";
/// Transport and store failures.
pub const ERRORS: &str = "errors";

/// A single monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Registry of named counters.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, Arc<Counter>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the service's standard counters pre-registered.
    pub fn with_defaults() -> Arc<Self> {
        let registry = Self::new();
        for name in [SENT, REQUESTS, ERRORS] {
            registry.register(name);
        }
        Arc::new(registry)
    }

    /// Get or create the counter named `name`.
    pub fn register(&self, name: &str) -> Arc<Counter> {
        if let Some(counter) = self.read_counter(name) {
            return counter;
        }
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(counters.entry(name.to_string()).or_default())
    }

    pub fn increment(&self, name: &str) {
        self.register(name).increment();
    }

    /// Current value, zero for a counter never registered.
    pub fn get(&self, name: &str) -> u64 {
        self.read_counter(name).map(|c| c.get()).unwrap_or(0)
    }

    /// All counters sorted by name.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        let mut snapshot: Vec<_> = counters
            .iter()
            .map(|(name, counter)| (name.clone(), counter.get()))
            .collect();
        snapshot.sort();
        snapshot
    }

    /// Text exposition, one `name value` line per counter.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in self.snapshot() {
            let _ = writeln!(out, "{name} {value}");
        }
        out
    }

    fn read_counter(&self, name: &str) -> Option<Arc<Counter>> {
        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        counters.get(name).cloned()
    }
}
