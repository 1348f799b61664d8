use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::batch::{AddOutcome, DeleteRequestBatch};
use crate::config::DeletionConfig;
use crate::interval::{Chunk, millis_to_datetime};
use crate::labels::Labels;
use crate::metrics::DeletionMetrics;
use crate::request::{ChunkFilter, DeleteRequest};

#[derive(Parser, Debug)]
#[command(name = "signaldb-deletion")]
#[command(about = "Evaluate SignalDB delete requests against chunks without modifying data")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Common CLI arguments shared across all binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Dry-run delete requests against chunk descriptors from a JSON file
    Check {
        #[arg(long, help = "Path to a JSON file with requests and chunks")]
        input: PathBuf,
    },
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Input of the `check` command.
#[derive(Debug, Deserialize)]
pub struct DryRunInput {
    #[serde(default)]
    pub requests: Vec<DeleteRequest>,
    #[serde(default)]
    pub chunks: Vec<ChunkEntry>,
}

/// A chunk descriptor, optionally with sample lines to run through filters.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkEntry {
    pub user_id: String,
    pub labels: Labels,
    pub from: i64,
    pub through: i64,
    #[serde(default)]
    pub lines: Vec<LineEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineEntry {
    /// Milliseconds since epoch
    pub timestamp: i64,
    pub line: String,
    #[serde(default)]
    pub structured_metadata: Labels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Unaffected,
    DeleteAll,
    Partial,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    pub index: usize,
    pub user_id: String,
    pub labels: Labels,
    pub from: i64,
    pub through: i64,
    pub decision: Decision,
    pub lines_total: usize,
    pub lines_deleted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRequest {
    pub request_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub chunks: Vec<ChunkReport>,
    pub skipped_requests: Vec<SkippedRequest>,
    pub deleted_lines_by_user: HashMap<String, u64>,
    pub chunks_selected_by_user: HashMap<String, u64>,
}

/// Evaluate every chunk of `input` against its requests.
///
/// Requests failing validation, duplicates and requests beyond the batch
/// size are reported as skipped instead of aborting the run.
pub fn run_check(config: &DeletionConfig, input: DryRunInput) -> CheckReport {
    let mut batch = DeleteRequestBatch::new(config.clone(), DeletionMetrics::new());
    let mut skipped_requests = Vec::new();

    for request in input.requests {
        let request_id = request.request_id.clone();
        let outcome = request
            .validate(config)
            .and_then(|()| batch.add(request));

        let reason = match outcome {
            Ok(AddOutcome::Added) => continue,
            Ok(AddOutcome::Duplicate { of }) => format!("duplicate of {of}"),
            Ok(AddOutcome::BatchFull) => "batch full".to_string(),
            Err(e) => {
                warn!(delete_request_id = %request_id, error = %e, "Rejected delete request");
                e.to_string()
            }
        };
        skipped_requests.push(SkippedRequest { request_id, reason });
    }

    let chunks = input
        .chunks
        .iter()
        .enumerate()
        .map(|(index, entry)| evaluate_chunk(&batch, index, entry))
        .collect();

    CheckReport {
        chunks,
        skipped_requests,
        deleted_lines_by_user: batch.metrics().deleted_lines_snapshot(),
        chunks_selected_by_user: batch.metrics().chunks_selected_snapshot(),
    }
}

fn evaluate_chunk(batch: &DeleteRequestBatch, index: usize, entry: &ChunkEntry) -> ChunkReport {
    let chunk = Chunk::new(entry.from, entry.through);
    let (decision, lines_deleted) = match batch.chunk_filter(&entry.user_id, &entry.labels, &chunk)
    {
        ChunkFilter::Unaffected => (Decision::Unaffected, 0),
        ChunkFilter::DeleteAll => (Decision::DeleteAll, entry.lines.len()),
        ChunkFilter::Partial(filter) => {
            let deleted = entry
                .lines
                .iter()
                .filter(|l| {
                    filter(
                        millis_to_datetime(l.timestamp),
                        &l.line,
                        &l.structured_metadata,
                    )
                })
                .count();
            (Decision::Partial, deleted)
        }
    };

    ChunkReport {
        index,
        user_id: entry.user_id.clone(),
        labels: entry.labels.clone(),
        from: entry.from,
        through: entry.through,
        decision,
        lines_total: entry.lines.len(),
        lines_deleted,
    }
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use std::path::Path;
    use tracing_subscriber::EnvFilter;

    /// Initialize logging based on CLI arguments. `RUST_LOG` takes precedence.
    pub fn init_logging(args: &CommonArgs) {
        let level = if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("SignalDB Deletion Configuration:");
            println!("===============================");
            println!("Mode: {}", config.deletion.mode);
            println!("Batch size: {}", config.deletion.batch_size);
            match config.deletion.max_interval {
                Some(max) => println!("Max interval: {max:?}"),
                None => println!("Max interval: unlimited"),
            }
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        tracing::info!("Validating configuration...");
        config
            .deletion
            .validate()
            .context("Invalid deletion configuration")?;
        tracing::info!("Configuration validation passed");
        Ok(())
    }

    /// Run the `check` command on an input file.
    pub fn check(config: &Configuration, input: &Path) -> Result<CheckReport> {
        validate_config(config)?;
        let raw = std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read {}", input.display()))?;
        let input: DryRunInput =
            serde_json::from_str(&raw).context("Failed to parse dry-run input")?;
        Ok(run_check(&config.deletion, input))
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
