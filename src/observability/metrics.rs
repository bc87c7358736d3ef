//! Engine counters
//!
//! Counters only, monotonic, reset only when the registry is created.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Registry of operational counters shared by every query of an orchestrator.
///
/// Uses Relaxed ordering: counters are independent and read only for
/// reporting.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    queries_executed: AtomicU64,
    queries_failed: AtomicU64,
    queries_timed_out: AtomicU64,
    documents_scanned: AtomicU64,
    documents_returned: AtomicU64,
    stages_executed: AtomicU64,
    subpipelines_executed: AtomicU64,
    graph_traversals: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_queries_executed(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_queries_failed(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_queries_timed_out(&self) {
        self.queries_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_documents_scanned(&self, n: u64) {
        self.documents_scanned.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_documents_returned(&self, n: u64) {
        self.documents_returned.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_stages_executed(&self) {
        self.stages_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Lookup, union and facet sub-pipeline runs
    pub fn increment_subpipelines(&self) {
        self.subpipelines_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_graph_traversals(&self) {
        self.graph_traversals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            queries_timed_out: self.queries_timed_out.load(Ordering::Relaxed),
            documents_scanned: self.documents_scanned.load(Ordering::Relaxed),
            documents_returned: self.documents_returned.load(Ordering::Relaxed),
            stages_executed: self.stages_executed.load(Ordering::Relaxed),
            subpipelines_executed: self.subpipelines_executed.load(Ordering::Relaxed),
            graph_traversals: self.graph_traversals.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queries_executed: u64,
    pub queries_failed: u64,
    pub queries_timed_out: u64,
    pub documents_scanned: u64,
    pub documents_returned: u64,
    pub stages_executed: u64,
    pub subpipelines_executed: u64,
    pub graph_traversals: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        assert_eq!(MetricsRegistry::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_increment_counters() {
        let registry = MetricsRegistry::new();
        registry.increment_queries_executed();
        registry.increment_queries_failed();
        registry.add_documents_scanned(40);
        registry.add_documents_scanned(2);
        registry.increment_subpipelines();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.queries_executed, 1);
        assert_eq!(snapshot.queries_failed, 1);
        assert_eq!(snapshot.documents_scanned, 42);
        assert_eq!(snapshot.subpipelines_executed, 1);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        reg.increment_stages_executed();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.snapshot().stages_executed, 800);
    }

    #[test]
    fn test_snapshot_serializes() {
        let registry = MetricsRegistry::new();
        registry.increment_graph_traversals();
        let json = serde_json::to_value(registry.snapshot()).unwrap();
        assert_eq!(json["graph_traversals"], 1);
    }
}
