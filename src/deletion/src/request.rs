//! Delete requests and the per-chunk deletion decision.
//!
//! A [`DeleteRequest`] is evaluated against many chunks, often from several
//! compaction workers at once. Its query is compiled lazily on first use and
//! published through a [`OnceCell`], so every worker observes either no
//! compiled query or a fully built one, and the query is compiled once.
//! Lines selected by a request are counted with atomic increments.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::config::DeletionConfig;
use crate::error::{CompileError, DeletionError};
use crate::interval::{Chunk, Interval, TimeInterval};
use crate::labels::{LabelMatcher, Labels, all_match};
use crate::logql::LogQlCompiler;
use crate::metrics::DeletionMetrics;
use crate::query::{LogSelector, QueryCompiler};

/// Decides whether a single line should be deleted, given its timestamp,
/// content and structured metadata.
pub type LineFilter<'a> = Box<dyn Fn(DateTime<Utc>, &str, &Labels) -> bool + Send + Sync + 'a>;

/// Lifecycle state of a delete request, owned by the request store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteRequestStatus {
    #[default]
    Received,
    Processing,
    Processed,
}

/// How a chunk is affected by a delete request.
pub enum ChunkFilter<'a> {
    /// The chunk holds no data selected by the request.
    Unaffected,
    /// Every line in the chunk is selected; drop it without reading lines.
    DeleteAll,
    /// Some lines may be selected; stream the chunk through the filter.
    Partial(LineFilter<'a>),
}

impl<'a> ChunkFilter<'a> {
    pub fn is_affected(&self) -> bool {
        !matches!(self, ChunkFilter::Unaffected)
    }

    /// Split into the affected flag and the optional line filter.
    pub fn into_parts(self) -> (bool, Option<LineFilter<'a>>) {
        match self {
            ChunkFilter::Unaffected => (false, None),
            ChunkFilter::DeleteAll => (true, None),
            ChunkFilter::Partial(filter) => (true, Some(filter)),
        }
    }
}

impl fmt::Debug for ChunkFilter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkFilter::Unaffected => write!(f, "Unaffected"),
            ChunkFilter::DeleteAll => write!(f, "DeleteAll"),
            ChunkFilter::Partial(_) => write!(f, "Partial(..)"),
        }
    }
}

/// A compiled query together with its stream matchers and canonical form.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    selector: Arc<dyn LogSelector>,
    matchers: Vec<LabelMatcher>,
    canonical: String,
}

impl CompiledQuery {
    fn compile(compiler: &dyn QueryCompiler, query: &str) -> Result<Self, CompileError> {
        let selector = compiler.compile(query)?;
        Ok(Self {
            matchers: selector.matchers().to_vec(),
            canonical: selector.to_string(),
            selector,
        })
    }

    pub fn selector(&self) -> &dyn LogSelector {
        self.selector.as_ref()
    }

    pub fn matchers(&self) -> &[LabelMatcher] {
        &self.matchers
    }

    pub fn has_filter(&self) -> bool {
        self.selector.has_filter()
    }

    /// Canonical rendering used to compare queries.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

fn default_compiler() -> Arc<dyn QueryCompiler> {
    Arc::new(LogQlCompiler)
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// A request to delete log lines of one user matching a query within a
/// time range.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub request_id: String,
    /// Start of the range, inclusive (milliseconds since epoch)
    pub start_time: i64,
    /// End of the range, inclusive (milliseconds since epoch)
    pub end_time: i64,
    pub query: String,
    #[serde(default)]
    pub status: DeleteRequestStatus,
    /// Creation time (milliseconds since epoch)
    #[serde(default)]
    pub created_at: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub sequence_num: i64,

    #[serde(skip)]
    compiled: OnceCell<CompiledQuery>,
    #[serde(skip)]
    time_interval: OnceCell<TimeInterval>,
    #[serde(skip, default = "default_compiler")]
    compiler: Arc<dyn QueryCompiler>,
    #[serde(skip)]
    metrics: DeletionMetrics,
    #[serde(skip)]
    deleted_lines: AtomicU64,
}

impl DeleteRequest {
    pub fn new(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        start_time: i64,
        end_time: i64,
        query: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            start_time,
            end_time,
            query: query.into(),
            status: DeleteRequestStatus::Received,
            created_at: Utc::now().timestamp_millis(),
            user_id: user_id.into(),
            sequence_num: 0,
            compiled: OnceCell::new(),
            time_interval: OnceCell::new(),
            compiler: default_compiler(),
            metrics: DeletionMetrics::default(),
            deleted_lines: AtomicU64::new(0),
        }
    }

    /// Use a different query compiler. Drops any compiled query.
    pub fn with_compiler(mut self, compiler: Arc<dyn QueryCompiler>) -> Self {
        self.compiler = compiler;
        self.compiled = OnceCell::new();
        self
    }

    /// Report deleted lines into a shared metrics registry.
    pub fn with_metrics(mut self, metrics: DeletionMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &DeletionMetrics {
        &self.metrics
    }

    /// The request's time range in milliseconds.
    pub fn interval(&self) -> Interval {
        Interval::new(self.start_time, self.end_time)
    }

    /// Compile `query` and make it the request's query.
    ///
    /// Always recompiles. On failure the previous query and compiled state
    /// are kept.
    pub fn set_query(&mut self, query: &str) -> Result<(), CompileError> {
        let compiled = CompiledQuery::compile(self.compiler.as_ref(), query)?;
        self.query = query.to_string();
        self.compiled = OnceCell::with_value(compiled);
        Ok(())
    }

    /// The compiled query, compiling it on first use.
    ///
    /// Concurrent first callers block until a single compilation finishes.
    pub fn compiled(&self) -> Result<&CompiledQuery, CompileError> {
        self.compiled
            .get_or_try_init(|| CompiledQuery::compile(self.compiler.as_ref(), &self.query))
    }

    /// Comma-joined matchers of the compiled query, or an empty string if the
    /// query has not been compiled yet.
    pub fn get_matchers(&self) -> String {
        self.compiled
            .get()
            .map(|c| {
                c.matchers()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default()
    }

    /// Request bounds as wall-clock time, converted once.
    pub fn time_interval(&self) -> &TimeInterval {
        self.time_interval
            .get_or_init(|| TimeInterval::from_millis(self.start_time, self.end_time))
    }

    /// Number of lines this request has selected for deletion so far.
    pub fn deleted_lines(&self) -> u64 {
        self.deleted_lines.load(Ordering::Relaxed)
    }

    /// Submission-time checks. Rejected requests never reach compaction.
    pub fn validate(&self, config: &DeletionConfig) -> Result<(), DeletionError> {
        if !config.mode.accepts_requests() {
            return Err(DeletionError::Disabled);
        }
        if self.query.trim().is_empty() {
            return Err(DeletionError::EmptyQuery {
                request_id: self.request_id.clone(),
            });
        }
        if self.start_time > self.end_time {
            return Err(DeletionError::InvalidTimeRange {
                start: self.start_time,
                end: self.end_time,
            });
        }
        if let Some(max_interval) = config.max_interval {
            let max_interval_ms = i64::try_from(max_interval.as_millis()).unwrap_or(i64::MAX);
            if self.end_time.saturating_sub(self.start_time) > max_interval_ms {
                return Err(DeletionError::IntervalTooLong {
                    start: self.start_time,
                    end: self.end_time,
                    max_interval_ms,
                });
            }
        }
        self.compiled_or_err().map(|_| ())
    }

    /// Checks whether the chunk holds data this request selects.
    pub fn is_deleted(&self, user_id: &str, labels: &Labels, chunk: &Chunk) -> bool {
        self.matching_query(user_id, labels, chunk).is_some()
    }

    /// Decides how the chunk is affected by this request.
    ///
    /// The whole chunk is deleted only when the request covers the chunk's
    /// time range and the query has no line filter; otherwise a line filter
    /// bound to the chunk's labels is returned.
    pub fn get_chunk_filter(
        &self,
        user_id: &str,
        labels: &Labels,
        chunk: &Chunk,
    ) -> ChunkFilter<'_> {
        let Some(compiled) = self.matching_query(user_id, labels, chunk) else {
            return ChunkFilter::Unaffected;
        };

        if self.interval().covers(&chunk.interval()) && !compiled.has_filter() {
            return ChunkFilter::DeleteAll;
        }

        match self.filter_function(labels) {
            Ok(filter) => ChunkFilter::Partial(filter),
            Err(e) => {
                // The query was validated when the request was accepted.
                error!(
                    delete_request_id = %self.request_id,
                    user = %self.user_id,
                    error = %e,
                    "unexpected error getting filter function"
                );
                ChunkFilter::Unaffected
            }
        }
    }

    /// Builds a line filter for a stream with the given labels.
    ///
    /// Lines selected by a query with a line pipeline are counted towards
    /// this request and its user.
    pub fn filter_function(&self, labels: &Labels) -> Result<LineFilter<'_>, CompileError> {
        let interval = *self.time_interval();
        let compiled = self.compiled()?;

        if !all_match(compiled.matchers(), labels) {
            return Ok(Box::new(|_: DateTime<Utc>, _: &str, _: &Labels| false));
        }

        if !compiled.has_filter() {
            return Ok(Box::new(move |ts: DateTime<Utc>, _: &str, _: &Labels| {
                interval.contains(ts)
            }));
        }

        let stream = compiled.selector().pipeline()?.for_stream(labels);
        let user_deleted_lines = self.metrics.deleted_lines_counter(&self.user_id);

        Ok(Box::new(
            move |ts: DateTime<Utc>, line: &str, structured_metadata: &Labels| {
                if !interval.contains(ts) {
                    return false;
                }

                if stream.process(line, structured_metadata).is_selected() {
                    user_deleted_lines.fetch_add(1, Ordering::Relaxed);
                    self.deleted_lines.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                false
            },
        ))
    }

    /// Reports whether `other` is a different request selecting the same
    /// data: same user, same time range and the same canonical query.
    pub fn is_duplicate(&self, other: &DeleteRequest) -> Result<bool, DeletionError> {
        if self.request_id == other.request_id {
            return Ok(false);
        }
        if self.user_id != other.user_id
            || self.start_time != other.start_time
            || self.end_time != other.end_time
        {
            return Ok(false);
        }

        let ours = self.compiled_or_err()?;
        let theirs = other.compiled_or_err()?;
        Ok(ours.canonical() == theirs.canonical())
    }

    fn matching_query(
        &self,
        user_id: &str,
        labels: &Labels,
        chunk: &Chunk,
    ) -> Option<&CompiledQuery> {
        if self.user_id != user_id {
            return None;
        }

        if !chunk.interval().overlaps(&self.interval()) {
            return None;
        }

        let compiled = match self.compiled() {
            Ok(compiled) => compiled,
            Err(e) => {
                error!(
                    delete_request_id = %self.request_id,
                    user = %self.user_id,
                    error = %e,
                    "failed to init log selector expr"
                );
                return None;
            }
        };

        all_match(compiled.matchers(), labels).then_some(compiled)
    }

    fn compiled_or_err(&self) -> Result<&CompiledQuery, DeletionError> {
        self.compiled().map_err(|source| DeletionError::Compile {
            request_id: self.request_id.clone(),
            user_id: self.user_id.clone(),
            source,
        })
    }
}
