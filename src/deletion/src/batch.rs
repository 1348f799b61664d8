//! Batches of delete requests evaluated together during one compaction pass.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::DeletionConfig;
use crate::error::DeletionError;
use crate::interval::Chunk;
use crate::labels::Labels;
use crate::metrics::DeletionMetrics;
use crate::request::{ChunkFilter, DeleteRequest, LineFilter};

/// Result of offering a request to a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// An equivalent request is already in the batch.
    Duplicate { of: String },
    /// The batch reached its configured size; retry in a later pass.
    BatchFull,
}

/// Delete requests grouped by user.
#[derive(Debug)]
pub struct DeleteRequestBatch {
    config: DeletionConfig,
    metrics: DeletionMetrics,
    requests: HashMap<String, Vec<DeleteRequest>>,
    count: usize,
}

impl DeleteRequestBatch {
    pub fn new(config: DeletionConfig, metrics: DeletionMetrics) -> Self {
        Self {
            config,
            metrics,
            requests: HashMap::new(),
            count: 0,
        }
    }

    /// Offer a request to the batch.
    ///
    /// Duplicates of requests already in the batch are skipped so the same
    /// data is not processed twice.
    pub fn add(&mut self, request: DeleteRequest) -> Result<AddOutcome, DeletionError> {
        if !self.config.mode.accepts_requests() {
            return Err(DeletionError::Disabled);
        }

        for existing in self.requests(&request.user_id) {
            if existing.is_duplicate(&request)? {
                info!(
                    delete_request_id = %request.request_id,
                    duplicate_of = %existing.request_id,
                    user = %request.user_id,
                    "Skipping duplicate delete request"
                );
                self.metrics.record_duplicate_skipped();
                return Ok(AddOutcome::Duplicate {
                    of: existing.request_id.clone(),
                });
            }
        }

        if self.count >= self.config.batch_size {
            debug!(
                delete_request_id = %request.request_id,
                batch_size = self.config.batch_size,
                "Delete request batch is full"
            );
            return Ok(AddOutcome::BatchFull);
        }

        let request = request.with_metrics(self.metrics.clone());
        self.requests
            .entry(request.user_id.clone())
            .or_default()
            .push(request);
        self.count += 1;
        Ok(AddOutcome::Added)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Requests of one user, in insertion order.
    pub fn requests(&self, user_id: &str) -> &[DeleteRequest] {
        self.requests
            .get(user_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get(&self, request_id: &str) -> Option<&DeleteRequest> {
        self.requests
            .values()
            .flatten()
            .find(|r| r.request_id == request_id)
    }

    /// Lines deleted so far on behalf of a request.
    pub fn deleted_lines(&self, request_id: &str) -> Option<u64> {
        self.get(request_id).map(DeleteRequest::deleted_lines)
    }

    pub fn metrics(&self) -> &DeletionMetrics {
        &self.metrics
    }

    /// Hand the requests back, e.g. to record their final status.
    pub fn into_requests(self) -> Vec<DeleteRequest> {
        self.requests.into_values().flatten().collect()
    }

    /// Decide how the chunk is affected by all of the user's requests.
    ///
    /// A request deleting the whole chunk wins outright. Otherwise the line
    /// filters of all affecting requests are combined, deleting a line when
    /// any of them selects it.
    pub fn chunk_filter(&self, user_id: &str, labels: &Labels, chunk: &Chunk) -> ChunkFilter<'_> {
        if !self.config.mode.deletes_data() {
            return ChunkFilter::Unaffected;
        }

        let mut filters: Vec<LineFilter<'_>> = Vec::new();
        for request in self.requests(user_id) {
            match request.get_chunk_filter(user_id, labels, chunk) {
                ChunkFilter::Unaffected => {}
                ChunkFilter::DeleteAll => {
                    self.metrics.record_chunk_selected(user_id);
                    return ChunkFilter::DeleteAll;
                }
                ChunkFilter::Partial(filter) => filters.push(filter),
            }
        }

        if filters.is_empty() {
            return ChunkFilter::Unaffected;
        }
        self.metrics.record_chunk_selected(user_id);

        if filters.len() == 1 {
            return filters
                .pop()
                .map_or(ChunkFilter::Unaffected, ChunkFilter::Partial);
        }

        ChunkFilter::Partial(Box::new(
            move |ts: DateTime<Utc>, line: &str, structured_metadata: &Labels| {
                filters.iter().any(|f| f(ts, line, structured_metadata))
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeletionMode;
    use crate::interval::millis_to_datetime;

    fn batch() -> DeleteRequestBatch {
        DeleteRequestBatch::new(DeletionConfig::default(), DeletionMetrics::new())
    }

    fn labels() -> Labels {
        Labels::new().with_label("app", "x")
    }

    #[test]
    fn test_add_skips_duplicates() {
        let mut batch = batch();
        let first = DeleteRequest::new("a", "tenant1", 100, 200, r#"{app="x"}"#);
        let dup = DeleteRequest::new("b", "tenant1", 100, 200, r#"{ app = "x" }"#);
        let other_user = DeleteRequest::new("c", "tenant2", 100, 200, r#"{app="x"}"#);

        assert_eq!(batch.add(first).unwrap(), AddOutcome::Added);
        assert_eq!(
            batch.add(dup).unwrap(),
            AddOutcome::Duplicate { of: "a".into() }
        );
        assert_eq!(batch.add(other_user).unwrap(), AddOutcome::Added);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.metrics().duplicates_skipped(), 1);
    }

    #[test]
    fn test_add_respects_batch_size() {
        let config = DeletionConfig {
            batch_size: 1,
            ..Default::default()
        };
        let mut batch = DeleteRequestBatch::new(config, DeletionMetrics::new());

        let first = DeleteRequest::new("a", "tenant1", 100, 200, r#"{app="x"}"#);
        let second = DeleteRequest::new("b", "tenant1", 100, 200, r#"{app="y"}"#);
        assert_eq!(batch.add(first).unwrap(), AddOutcome::Added);
        assert_eq!(batch.add(second).unwrap(), AddOutcome::BatchFull);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_add_rejected_when_disabled() {
        let config = DeletionConfig {
            mode: DeletionMode::Disabled,
            ..Default::default()
        };
        let mut batch = DeleteRequestBatch::new(config, DeletionMetrics::new());
        let req = DeleteRequest::new("a", "tenant1", 100, 200, r#"{app="x"}"#);
        assert!(matches!(batch.add(req), Err(DeletionError::Disabled)));
    }

    #[test]
    fn test_add_propagates_duplicate_check_errors() {
        let mut batch = batch();
        batch
            .add(DeleteRequest::new("a", "tenant1", 100, 200, r#"{app="x"}"#))
            .unwrap();
        let broken = DeleteRequest::new("b", "tenant1", 100, 200, "{app");
        assert!(matches!(
            batch.add(broken),
            Err(DeletionError::Compile { .. })
        ));
    }

    #[test]
    fn test_filter_only_mode_never_deletes() {
        let config = DeletionConfig {
            mode: DeletionMode::FilterOnly,
            ..Default::default()
        };
        let mut batch = DeleteRequestBatch::new(config, DeletionMetrics::new());
        batch
            .add(DeleteRequest::new("a", "tenant1", 100, 200, r#"{app="x"}"#))
            .unwrap();

        let decision = batch.chunk_filter("tenant1", &labels(), &Chunk::new(150, 180));
        assert!(!decision.is_affected());
    }

    #[test]
    fn test_whole_chunk_deletion_wins() {
        let mut batch = batch();
        batch
            .add(DeleteRequest::new("a", "tenant1", 100, 200, r#"{app="x"} |= "a""#))
            .unwrap();
        batch
            .add(DeleteRequest::new("b", "tenant1", 0, 300, r#"{app="x"}"#))
            .unwrap();

        let decision = batch.chunk_filter("tenant1", &labels(), &Chunk::new(150, 180));
        assert!(matches!(decision, ChunkFilter::DeleteAll));
        assert_eq!(batch.metrics().chunks_selected("tenant1"), 1);
    }

    #[test]
    fn test_partial_filters_are_combined() {
        let mut batch = batch();
        batch
            .add(DeleteRequest::new("a", "tenant1", 100, 200, r#"{app="x"} |= "alpha""#))
            .unwrap();
        batch
            .add(DeleteRequest::new("b", "tenant1", 100, 200, r#"{app="x"} |= "beta""#))
            .unwrap();

        let decision = batch.chunk_filter("tenant1", &labels(), &Chunk::new(150, 180));
        let ChunkFilter::Partial(filter) = decision else {
            panic!("expected partial decision, got {decision:?}");
        };

        let ts = millis_to_datetime(160);
        let none = Labels::new();
        assert!(filter(ts, "alpha", &none));
        assert!(filter(ts, "beta", &none));
        assert!(!filter(ts, "gamma", &none));

        assert_eq!(batch.deleted_lines("a"), Some(1));
        assert_eq!(batch.deleted_lines("b"), Some(1));
        assert_eq!(batch.deleted_lines("missing"), None);
        assert_eq!(batch.metrics().deleted_lines("tenant1"), 2);
        assert_eq!(batch.metrics().chunks_selected("tenant1"), 1);
    }

    #[test]
    fn test_unaffected_chunks_are_not_counted() {
        let mut batch = batch();
        batch
            .add(DeleteRequest::new("a", "tenant1", 100, 200, r#"{app="x"}"#))
            .unwrap();

        let decision = batch.chunk_filter("tenant1", &labels(), &Chunk::new(300, 400));
        assert!(!decision.is_affected());
        let decision = batch.chunk_filter("tenant9", &labels(), &Chunk::new(150, 180));
        assert!(!decision.is_affected());
        assert_eq!(batch.metrics().chunks_selected("tenant1"), 0);
    }

    #[test]
    fn test_into_requests_returns_everything() {
        let mut batch = batch();
        batch
            .add(DeleteRequest::new("a", "tenant1", 100, 200, r#"{app="x"}"#))
            .unwrap();
        batch
            .add(DeleteRequest::new("b", "tenant2", 100, 200, r#"{app="x"}"#))
            .unwrap();

        let mut ids: Vec<String> = batch
            .into_requests()
            .into_iter()
            .map(|r| r.request_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
