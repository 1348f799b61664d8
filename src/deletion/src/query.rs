//! Seams to the query engine that compiles delete request queries.
//!
//! Deletion only consumes compiled queries: the label matchers a chunk's
//! stream must satisfy and, optionally, a line pipeline that selects lines
//! within a stream. The default implementation is [`crate::logql::LogQlCompiler`].

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::error::CompileError;
use crate::labels::{LabelMatcher, Labels};

/// Compiles query strings into [`LogSelector`]s.
pub trait QueryCompiler: fmt::Debug + Send + Sync {
    fn compile(&self, query: &str) -> Result<Arc<dyn LogSelector>, CompileError>;
}

/// A compiled delete request query.
///
/// `Display` renders the canonical form used for duplicate detection.
pub trait LogSelector: fmt::Display + fmt::Debug + Send + Sync {
    /// Label matchers the stream must satisfy.
    fn matchers(&self) -> &[LabelMatcher];

    /// Whether the query carries anything beyond the stream selector.
    fn has_filter(&self) -> bool;

    /// The line pipeline of the query.
    fn pipeline(&self) -> Result<Arc<dyn Pipeline>, CompileError>;
}

/// A line pipeline not yet bound to a stream.
pub trait Pipeline: Send + Sync {
    fn for_stream(&self, labels: &Labels) -> Box<dyn StreamPipeline>;
}

/// A line pipeline bound to one stream's label set.
pub trait StreamPipeline: Send + Sync {
    fn process<'a>(&'a self, line: &'a str, structured_metadata: &'a Labels)
    -> ProcessedLine<'a>;
}

/// Outcome of running one line through a [`StreamPipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedLine<'a> {
    /// Transformed line content. Non-empty when the pipeline selected the line.
    pub line: Cow<'a, str>,
    /// Stream labels of the line.
    pub labels: Cow<'a, Labels>,
    /// Set when the pipeline selected the line without producing content.
    pub skip: bool,
}

impl ProcessedLine<'_> {
    /// Whether the line is selected by the query.
    pub fn is_selected(&self) -> bool {
        !self.line.is_empty() || self.skip
    }
}
