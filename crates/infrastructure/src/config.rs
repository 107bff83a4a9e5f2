//! Run configuration and validation.

use clap::ValueEnum;
use domain::traffic::entity::MatchMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{DEFAULT_MAX_HOSTS, DEFAULT_MAX_TASKS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Flattened JSON for log aggregators.
    Json,
    /// Human-readable output for interactive runs.
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

/// Core run options, already merged from CLI flags and defaults.
#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    pub mode: MatchMode,
    pub workers: usize,
    pub max_hosts: u64,
    /// 0 = unlimited.
    pub max_tasks: u64,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Validation {
                field: "workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.mode == MatchMode::Expand && self.max_hosts == 0 {
            return Err(ConfigError::Validation {
                field: "max_hosts".to_string(),
                message: "expand mode needs a non-zero host threshold".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: MatchMode::Sample,
            workers: default_workers(),
            max_hosts: DEFAULT_MAX_HOSTS,
            max_tasks: DEFAULT_MAX_TASKS,
        }
    }
}

/// Number of workers to use when the CLI does not say: one per core.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
