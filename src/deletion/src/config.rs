//! Deletion configuration.
//!
//! Loaded with the usual SignalDB layering: defaults, then `signaldb.toml`,
//! then `SIGNALDB__`-prefixed environment variables with `__` as the nesting
//! separator (e.g. `SIGNALDB__DELETION__BATCH_SIZE=100`).

use std::fmt;
use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How delete requests are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletionMode {
    /// Delete requests are not accepted.
    Disabled,
    /// Requests are accepted and filtered at query time, but chunks are not
    /// rewritten.
    FilterOnly,
    /// Requests are accepted and chunks are rewritten during compaction.
    #[default]
    FilterAndDelete,
}

impl DeletionMode {
    /// Whether requests are accepted at all.
    pub fn accepts_requests(&self) -> bool {
        !matches!(self, DeletionMode::Disabled)
    }

    /// Whether compaction removes data for accepted requests.
    pub fn deletes_data(&self) -> bool {
        matches!(self, DeletionMode::FilterAndDelete)
    }
}

impl fmt::Display for DeletionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletionMode::Disabled => write!(f, "disabled"),
            DeletionMode::FilterOnly => write!(f, "filter-only"),
            DeletionMode::FilterAndDelete => write!(f, "filter-and-delete"),
        }
    }
}

/// Delete request processing configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletionConfig {
    /// Deletion mode.
    ///
    /// Env: SIGNALDB__DELETION__MODE
    #[serde(default)]
    pub mode: DeletionMode,

    /// Maximum number of delete requests evaluated in one compaction pass.
    ///
    /// Env: SIGNALDB__DELETION__BATCH_SIZE
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Longest time range a single delete request may cover.
    ///
    /// Env: SIGNALDB__DELETION__MAX_INTERVAL
    #[serde(
        with = "humantime_serde",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_interval: Option<Duration>,
}

fn default_batch_size() -> usize {
    70
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            mode: DeletionMode::default(),
            batch_size: default_batch_size(),
            max_interval: None,
        }
    }
}

impl DeletionConfig {
    /// Validate the deletion configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }
        if let Some(max_interval) = self.max_interval.filter(Duration::is_zero) {
            return Err(ConfigError::InvalidMaxInterval(max_interval));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Delete request processing
    #[serde(default)]
    pub deletion: DeletionConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file("signaldb.toml"))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path))
            .extract()
            .map_err(Box::new)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed("SIGNALDB__").split("__"))
    }
}

/// Errors that can occur during configuration validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid batch size {0}: must be positive")]
    InvalidBatchSize(usize),

    #[error("Invalid max interval {0:?}: must be positive")]
    InvalidMaxInterval(Duration),
}
