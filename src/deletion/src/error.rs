//! Error types for delete request compilation and evaluation.

use thiserror::Error;

/// Errors raised while compiling a delete request query into matchers and a
/// line pipeline.
#[derive(Error, Debug)]
pub enum CompileError {
    /// The query text could not be parsed.
    #[error("invalid delete request query '{query}' at position {position}: {message}")]
    Parse {
        query: String,
        position: usize,
        message: String,
    },

    /// A regex used by a label matcher or line filter failed to compile.
    #[error("invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The stream selector contained no label matchers.
    #[error("delete request query '{query}' must contain at least one label matcher")]
    NoMatchers { query: String },

    /// Every label matcher also matches a missing label, so the selector
    /// would select all streams.
    #[error(
        "delete request query '{query}' must contain a matcher that does not match empty labels"
    )]
    EmptyCompatibleSelector { query: String },

    /// The query used a pipeline stage deletion does not support.
    #[error("unsupported stage in delete request query: {stage}")]
    UnsupportedStage { stage: String },
}

/// Errors surfaced by delete request validation, duplicate detection and
/// batch admission.
#[derive(Error, Debug)]
pub enum DeletionError {
    /// Lazily compiling a stored request query failed.
    #[error(
        "failed to init log selector expr for request_id={request_id}, user_id={user_id}: {source}"
    )]
    Compile {
        request_id: String,
        user_id: String,
        #[source]
        source: CompileError,
    },

    /// The request's start time is after its end time.
    #[error("invalid time range [{start}, {end}]: start must not be after end")]
    InvalidTimeRange { start: i64, end: i64 },

    /// The request spans more time than the configured maximum interval.
    #[error("time range [{start}, {end}] exceeds max interval of {max_interval_ms}ms")]
    IntervalTooLong {
        start: i64,
        end: i64,
        max_interval_ms: i64,
    },

    /// The request carries no query.
    #[error("delete request {request_id} has an empty query")]
    EmptyQuery { request_id: String },

    /// Deletion is disabled by configuration.
    #[error("deletion is disabled")]
    Disabled,
}
