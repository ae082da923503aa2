//! Coordinator counters
//!
//! - Counters only, monotonic
//! - Reset only when the registry is created
//! - Exact values, read through [`MetricsRegistry::snapshot`]

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Registry of coordinator counters
///
/// Counters are atomics so a registry can be shared with a reporter thread,
/// although the coordinator itself only touches it from its event loop.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    requests_executed: AtomicU64,
    requests_failed: AtomicU64,
    cursor_steps: AtomicU64,
    keys_generated: AtomicU64,
    upgrades: AtomicU64,
    databases_deleted: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_transactions_started(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_transactions_committed(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_transactions_aborted(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// A request operation ran and produced a result
    pub fn increment_requests_executed(&self) {
        self.requests_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// A request operation ran and failed
    pub fn increment_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cursor_steps(&self) {
        self.cursor_steps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_keys_generated(&self) {
        self.keys_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_upgrades(&self) {
        self.upgrades.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_databases_deleted(&self) {
        self.databases_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all counters as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            requests_executed: self.requests_executed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            cursor_steps: self.cursor_steps.load(Ordering::Relaxed),
            keys_generated: self.keys_generated.load(Ordering::Relaxed),
            upgrades: self.upgrades.load(Ordering::Relaxed),
            databases_deleted: self.databases_deleted.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of every counter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub transactions_started: u64,
    pub transactions_committed: u64,
    pub transactions_aborted: u64,
    pub requests_executed: u64,
    pub requests_failed: u64,
    pub cursor_steps: u64,
    pub keys_generated: u64,
    pub upgrades: u64,
    pub databases_deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_increment_counters() {
        let registry = MetricsRegistry::new();

        registry.increment_transactions_started();
        registry.increment_transactions_started();
        registry.increment_transactions_committed();
        registry.increment_transactions_aborted();
        registry.increment_requests_executed();
        registry.increment_requests_failed();
        registry.increment_cursor_steps();
        registry.increment_keys_generated();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.transactions_started, 2);
        assert_eq!(snapshot.transactions_committed, 1);
        assert_eq!(snapshot.transactions_aborted, 1);
        assert_eq!(snapshot.requests_executed, 1);
        assert_eq!(snapshot.requests_failed, 1);
        assert_eq!(snapshot.cursor_steps, 1);
        assert_eq!(snapshot.keys_generated, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let registry = MetricsRegistry::new();
        registry.increment_upgrades();
        registry.increment_databases_deleted();

        let json = serde_json::to_value(registry.snapshot()).unwrap();
        assert_eq!(json["upgrades"], 1);
        assert_eq!(json["databases_deleted"], 1);
        assert_eq!(json["transactions_aborted"], 0);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..250 {
                        reg.increment_cursor_steps();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.snapshot().cursor_steps, 1000);
    }
}
