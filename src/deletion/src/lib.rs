//! SignalDB Deletion Library
//!
//! Decides, per stored chunk, whether log data is affected by user-submitted
//! delete requests:
//! - Lazy, once-only compilation of delete request queries
//! - Chunk decisions: unaffected, delete the whole chunk, or filter lines
//! - Line filters bound to a chunk's stream labels
//! - Duplicate request detection
//! - Per-user deleted line and chunk metrics
//!
//! Storage, request persistence and chunk rewriting live elsewhere; this
//! crate is purely in-memory.

pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod interval;
pub mod labels;
pub mod logql;
pub mod metrics;
pub mod query;
pub mod request;

// Re-export commonly used types
pub use batch::{AddOutcome, DeleteRequestBatch};
pub use config::{Configuration, DeletionConfig, DeletionMode};
pub use error::{CompileError, DeletionError};
pub use interval::{Chunk, Interval, TimeInterval};
pub use labels::{LabelMatcher, Labels, MatchOp};
pub use logql::LogQlCompiler;
pub use metrics::DeletionMetrics;
pub use query::{LogSelector, Pipeline, ProcessedLine, QueryCompiler, StreamPipeline};
pub use request::{ChunkFilter, CompiledQuery, DeleteRequest, DeleteRequestStatus, LineFilter};
