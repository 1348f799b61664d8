//! Compiler for the LogQL subset accepted by delete requests.
//!
//! ```text
//! {app="api", env=~"prod|staging"} |= "password" != "debug" | level="error"
//! ```
//!
//! A query is a stream selector with at least one label matcher followed by
//! any number of line filters (`|=`, `!=`, `|~`, `!~`) and label filters
//! (`| name<op>"value"`). Label filters see structured metadata first and
//! fall back to the stream labels. Parsers, formatters and metric queries
//! are rejected.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::CompileError;
use crate::labels::{LabelMatcher, Labels, MatchOp};
use crate::query::{LogSelector, Pipeline, ProcessedLine, QueryCompiler, StreamPipeline};

/// Default [`QueryCompiler`] for delete request queries.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogQlCompiler;

impl QueryCompiler for LogQlCompiler {
    fn compile(&self, query: &str) -> Result<Arc<dyn LogSelector>, CompileError> {
        Ok(Arc::new(parse(query)?))
    }
}

/// Parse a delete request query.
pub fn parse(query: &str) -> Result<LogQlSelector, CompileError> {
    Parser::new(query).parse()
}

/// A parsed delete request query.
#[derive(Debug, Clone)]
pub struct LogQlSelector {
    matchers: Vec<LabelMatcher>,
    stages: Arc<[Stage]>,
}

impl LogQlSelector {
    pub fn stages(&self) -> usize {
        self.stages.len()
    }
}

impl LogSelector for LogQlSelector {
    fn matchers(&self) -> &[LabelMatcher] {
        &self.matchers
    }

    fn has_filter(&self) -> bool {
        !self.stages.is_empty()
    }

    fn pipeline(&self) -> Result<Arc<dyn Pipeline>, CompileError> {
        Ok(Arc::new(LinePipeline {
            stages: Arc::clone(&self.stages),
        }))
    }
}

impl fmt::Display for LogQlSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, matcher) in self.matchers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{matcher}")?;
        }
        write!(f, "}}")?;
        for stage in self.stages.iter() {
            write!(f, " {stage}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Stage {
    LineContains(String),
    LineNotContains(String),
    LineMatches(Regex),
    LineNotMatches(Regex),
    Label(LabelMatcher),
}

impl Stage {
    fn accepts(&self, line: &str, structured_metadata: &Labels, stream: &Labels) -> bool {
        match self {
            Stage::LineContains(needle) => line.contains(needle.as_str()),
            Stage::LineNotContains(needle) => !line.contains(needle.as_str()),
            Stage::LineMatches(re) => re.is_match(line),
            Stage::LineNotMatches(re) => !re.is_match(line),
            Stage::Label(matcher) => {
                let value = structured_metadata
                    .lookup(&matcher.name)
                    .or_else(|| stream.lookup(&matcher.name))
                    .unwrap_or("");
                matcher.matches(value)
            }
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::LineContains(s) => write!(f, "|= {s:?}"),
            Stage::LineNotContains(s) => write!(f, "!= {s:?}"),
            Stage::LineMatches(re) => write!(f, "|~ {:?}", re.as_str()),
            Stage::LineNotMatches(re) => write!(f, "!~ {:?}", re.as_str()),
            Stage::Label(matcher) => write!(f, "| {matcher}"),
        }
    }
}

struct LinePipeline {
    stages: Arc<[Stage]>,
}

impl Pipeline for LinePipeline {
    fn for_stream(&self, labels: &Labels) -> Box<dyn StreamPipeline> {
        Box::new(StreamLinePipeline {
            stages: Arc::clone(&self.stages),
            stream: labels.clone(),
        })
    }
}

struct StreamLinePipeline {
    stages: Arc<[Stage]>,
    stream: Labels,
}

impl StreamPipeline for StreamLinePipeline {
    fn process<'a>(
        &'a self,
        line: &'a str,
        structured_metadata: &'a Labels,
    ) -> ProcessedLine<'a> {
        let selected = self
            .stages
            .iter()
            .all(|stage| stage.accepts(line, structured_metadata, &self.stream));

        if !selected {
            return ProcessedLine {
                line: Cow::Borrowed(""),
                labels: Cow::Borrowed(&self.stream),
                skip: false,
            };
        }

        // An empty line still counts as selected.
        ProcessedLine {
            line: Cow::Borrowed(line),
            labels: Cow::Borrowed(&self.stream),
            skip: line.is_empty(),
        }
    }
}

struct Parser<'q> {
    query: &'q str,
    pos: usize,
}

impl<'q> Parser<'q> {
    fn new(query: &'q str) -> Self {
        Self { query, pos: 0 }
    }

    fn parse(mut self) -> Result<LogQlSelector, CompileError> {
        let mut matchers = self.parse_selector()?;
        if matchers.is_empty() {
            return Err(CompileError::NoMatchers {
                query: self.query.to_string(),
            });
        }
        if matchers.iter().all(|m| m.matches("")) {
            return Err(CompileError::EmptyCompatibleSelector {
                query: self.query.to_string(),
            });
        }
        matchers.sort_by(|a, b| (&a.name, a.op, &a.value).cmp(&(&b.name, b.op, &b.value)));

        let mut stages = Vec::new();
        loop {
            self.skip_whitespace();
            if self.rest().is_empty() {
                break;
            }
            stages.push(self.parse_stage()?);
        }

        Ok(LogQlSelector {
            matchers,
            stages: stages.into(),
        })
    }

    fn parse_selector(&mut self) -> Result<Vec<LabelMatcher>, CompileError> {
        self.skip_whitespace();
        self.expect("{")?;

        let mut matchers = Vec::new();
        loop {
            self.skip_whitespace();
            if self.eat("}") {
                break;
            }
            matchers.push(self.parse_matcher()?);
            self.skip_whitespace();
            if self.eat(",") {
                continue;
            }
            self.expect("}")?;
            break;
        }
        Ok(matchers)
    }

    fn parse_stage(&mut self) -> Result<Stage, CompileError> {
        if self.eat("|=") {
            return Ok(Stage::LineContains(self.parse_operand()?));
        }
        if self.eat("!=") {
            return Ok(Stage::LineNotContains(self.parse_operand()?));
        }
        if self.eat("|~") {
            return Ok(Stage::LineMatches(self.parse_regex_operand()?));
        }
        if self.eat("!~") {
            return Ok(Stage::LineNotMatches(self.parse_regex_operand()?));
        }
        if self.eat("|") {
            self.skip_whitespace();
            let start = self.pos;
            let name = self.parse_identifier()?;
            self.skip_whitespace();
            let Some(op) = self.parse_match_op() else {
                return Err(CompileError::UnsupportedStage {
                    stage: self.query[start..].trim().to_string(),
                });
            };
            self.skip_whitespace();
            let value = self.parse_string()?;
            return Ok(Stage::Label(LabelMatcher::new(op, name, &value)?));
        }

        Err(CompileError::UnsupportedStage {
            stage: self.rest().trim().to_string(),
        })
    }

    fn parse_matcher(&mut self) -> Result<LabelMatcher, CompileError> {
        let name = self.parse_identifier()?;
        self.skip_whitespace();
        let op = self
            .parse_match_op()
            .ok_or_else(|| self.error("expected one of =, !=, =~, !~"))?;
        self.skip_whitespace();
        let value = self.parse_string()?;
        LabelMatcher::new(op, name, &value)
    }

    fn parse_operand(&mut self) -> Result<String, CompileError> {
        self.skip_whitespace();
        self.parse_string()
    }

    fn parse_regex_operand(&mut self) -> Result<Regex, CompileError> {
        let pattern = self.parse_operand()?;
        Regex::new(&pattern).map_err(|source| CompileError::InvalidRegex { pattern, source })
    }

    fn parse_match_op(&mut self) -> Option<MatchOp> {
        // Two-character operators first so "=~" is not read as "=".
        [
            ("=~", MatchOp::RegexMatch),
            ("!~", MatchOp::RegexNotMatch),
            ("!=", MatchOp::NotEqual),
            ("=", MatchOp::Equal),
        ]
        .into_iter()
        .find_map(|(token, op)| self.eat(token).then_some(op))
    }

    fn parse_identifier(&mut self) -> Result<&'q str, CompileError> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|&(i, c)| {
                !(c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()))
            })
            .map_or(rest.len(), |(i, _)| i);
        if len == 0 {
            return Err(self.error("expected label name"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn parse_string(&mut self) -> Result<String, CompileError> {
        if self.eat("`") {
            let rest = self.rest();
            let end = rest
                .find('`')
                .ok_or_else(|| self.error("unterminated raw string"))?;
            self.pos += end + 1;
            return Ok(rest[..end].to_string());
        }

        self.expect("\"")?;
        let mut value = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(value);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, escaped @ ('"' | '\\'))) => value.push(escaped),
                    Some((j, other)) => {
                        self.pos += j;
                        return Err(self.error(&format!("unknown escape sequence \\{other}")));
                    }
                    None => break,
                },
                c => value.push(c),
            }
        }
        Err(self.error("unterminated string"))
    }

    fn rest(&self) -> &'q str {
        &self.query[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), CompileError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{token}'")))
        }
    }

    fn error(&self, message: &str) -> CompileError {
        CompileError::Parse {
            query: self.query.to_string(),
            position: self.pos,
            message: message.to_string(),
        }
    }
}
