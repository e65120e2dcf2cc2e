pub mod config;
pub mod ingest;
pub mod query;

use crate::config::{Config, ConfigError};
use crate::pipeline::{IngestError, IngestionPipeline, PipelineError};
use crate::query::{QueryError, QueryPlanner};
use crate::storage::duckdb::DuckDbStorage;
use crate::storage::{RecordStore, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("query error: {0}")]
    Query(#[from] QueryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    NotFound(String),
}

/// Open the configured database and make sure the schema exists
pub async fn open_storage(config: &Config) -> Result<Arc<DuckDbStorage>, CliError> {
    info!(path = %config.storage.path.display(), "Opening storage");
    let storage = Arc::new(DuckDbStorage::new(&config.storage.path)?);
    storage.init_schema().await?;
    Ok(storage)
}

/// Pipeline staging batches and rollups in the same database as the records
pub fn pipeline_for(storage: &Arc<DuckDbStorage>) -> IngestionPipeline {
    IngestionPipeline::new(storage.clone(), storage.clone(), storage.clone())
}

pub fn planner_for(storage: &Arc<DuckDbStorage>, config: &Config) -> QueryPlanner {
    QueryPlanner::new(storage.clone(), storage.clone(), config.query.limits())
}
