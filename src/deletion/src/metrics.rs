//! Deletion Metrics
//!
//! Thread-safe per-user counters for lines and chunks selected by delete
//! requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;

/// Thread-safe metrics for tracking delete request processing
#[derive(Debug, Clone, Default)]
pub struct DeletionMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Lines selected for deletion, by user
    deleted_lines_total: PerUserCounter,
    /// Chunks selected for full or partial deletion, by user
    chunks_selected_total: PerUserCounter,
    /// Requests not added to a batch because an equivalent one was present
    duplicates_skipped: AtomicUsize,
}

/// A counter family keyed by user ID.
#[derive(Debug, Default)]
struct PerUserCounter {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
}

impl PerUserCounter {
    fn handle(&self, user_id: &str) -> Arc<AtomicU64> {
        if let Some(counter) = self.counters.read().get(user_id) {
            return Arc::clone(counter);
        }
        Arc::clone(
            self.counters
                .write()
                .entry(user_id.to_string())
                .or_default(),
        )
    }

    fn get(&self, user_id: &str) -> u64 {
        self.counters
            .read()
            .get(user_id)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    fn snapshot(&self) -> HashMap<String, u64> {
        self.counters
            .read()
            .iter()
            .map(|(user, c)| (user.clone(), c.load(Ordering::Relaxed)))
            .collect()
    }
}

impl DeletionMetrics {
    /// Create a new metrics tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter handle for lines deleted on behalf of `user_id`.
    ///
    /// Resolve once per bound line filter and increment the handle per line.
    pub fn deleted_lines_counter(&self, user_id: &str) -> Arc<AtomicU64> {
        self.inner.deleted_lines_total.handle(user_id)
    }

    /// Record deleted lines for a user
    pub fn record_deleted_lines(&self, user_id: &str, count: u64) {
        self.deleted_lines_counter(user_id)
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Record a chunk selected for deletion
    pub fn record_chunk_selected(&self, user_id: &str) {
        self.inner
            .chunks_selected_total
            .handle(user_id)
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a duplicate request skipped during batching
    pub fn record_duplicate_skipped(&self) {
        self.inner
            .duplicates_skipped
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Get total deleted lines for a user
    pub fn deleted_lines(&self, user_id: &str) -> u64 {
        self.inner.deleted_lines_total.get(user_id)
    }

    /// Get total chunks selected for a user
    pub fn chunks_selected(&self, user_id: &str) -> u64 {
        self.inner.chunks_selected_total.get(user_id)
    }

    /// Get total duplicate requests skipped
    pub fn duplicates_skipped(&self) -> usize {
        self.inner.duplicates_skipped.load(Ordering::Relaxed)
    }

    /// Deleted line totals for every user seen so far, for export.
    pub fn deleted_lines_snapshot(&self) -> HashMap<String, u64> {
        self.inner.deleted_lines_total.snapshot()
    }

    /// Chunk selection totals for every user seen so far, for export.
    pub fn chunks_selected_snapshot(&self) -> HashMap<String, u64> {
        self.inner.chunks_selected_total.snapshot()
    }
}
