//! # Metrics
//!
//! Advisory operation counters. Updated with relaxed atomics and readable
//! without the database mutex; values are approximate under concurrency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Default)]
pub struct DatabaseMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // Mutation counters
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    rejected_mutations: AtomicU64,

    // Query counters
    searches: AtomicU64,
    search_errors: AtomicU64,
    batch_operations: AtomicU64,

    // Persistence counters
    wal_appends: AtomicU64,
    wal_bytes: AtomicU64,
    checkpoints: AtomicU64,
    index_rebuilds: AtomicU64,
}

impl DatabaseMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&self) {
        self.inner.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update(&self) {
        self.inner.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.inner.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_mutation(&self) {
        self.inner.rejected_mutations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_search(&self) {
        self.inner.searches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_search_error(&self) {
        self.inner.search_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_operation(&self) {
        self.inner.batch_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wal_append(&self, bytes: u64) {
        self.inner.wal_appends.fetch_add(1, Ordering::Relaxed);
        self.inner.wal_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_checkpoint(&self) {
        self.inner.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_index_rebuild(&self) {
        self.inner.index_rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let m = &self.inner;
        MetricsSnapshot {
            inserts: m.inserts.load(Ordering::Relaxed),
            updates: m.updates.load(Ordering::Relaxed),
            deletes: m.deletes.load(Ordering::Relaxed),
            rejected_mutations: m.rejected_mutations.load(Ordering::Relaxed),
            searches: m.searches.load(Ordering::Relaxed),
            search_errors: m.search_errors.load(Ordering::Relaxed),
            batch_operations: m.batch_operations.load(Ordering::Relaxed),
            wal_appends: m.wal_appends.load(Ordering::Relaxed),
            wal_bytes: m.wal_bytes.load(Ordering::Relaxed),
            checkpoints: m.checkpoints.load(Ordering::Relaxed),
            index_rebuilds: m.index_rebuilds.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub rejected_mutations: u64,
    pub searches: u64,
    pub search_errors: u64,
    pub batch_operations: u64,
    pub wal_appends: u64,
    pub wal_bytes: u64,
    pub checkpoints: u64,
    pub index_rebuilds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = DatabaseMetrics::new();
        metrics.record_insert();
        metrics.record_insert();
        metrics.record_wal_append(128);
        let snap = metrics.snapshot();
        assert_eq!(snap.inserts, 2);
        assert_eq!(snap.wal_appends, 1);
        assert_eq!(snap.wal_bytes, 128);
    }
}
