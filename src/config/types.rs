use crate::query::QueryLimits;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("~/.local/share/proclens/proclens.duckdb")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Concurrent materialize workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Batch ids that can wait for a worker before submit blocks
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_size: default_queue_size(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_queue_size() -> usize {
    256
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_cache_capacity")]
    pub rollup_cache_capacity: usize,
    #[serde(default = "default_window", with = "humantime_serde")]
    pub default_window: Duration,
    #[serde(default = "default_max_window", with = "humantime_serde")]
    pub max_window: Duration,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            rollup_cache_capacity: default_cache_capacity(),
            default_window: default_window(),
            max_window: default_max_window(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

const DAY: u64 = 24 * 60 * 60;

fn default_cache_capacity() -> usize {
    128
}

fn default_window() -> Duration {
    Duration::from_secs(30 * DAY)
}

fn default_max_window() -> Duration {
    Duration::from_secs(365 * DAY)
}

fn default_limit() -> usize {
    100
}

fn default_max_limit() -> usize {
    1000
}

impl QueryConfig {
    pub fn limits(&self) -> QueryLimits {
        let fallback = QueryLimits::default();
        QueryLimits {
            default_window: chrono::Duration::from_std(self.default_window)
                .unwrap_or(fallback.default_window),
            max_window: chrono::Duration::from_std(self.max_window)
                .unwrap_or(fallback.max_window),
            default_limit: self.default_limit,
            max_limit: self.max_limit,
            rollup_cache_capacity: self.rollup_cache_capacity,
        }
    }
}
