use super::{open_storage, pipeline_for, CliError};
use crate::config::Config;
use crate::model::BatchMetaInfo;
use crate::pipeline::{IngestReceipt, IngestRequest, MaterializeQueue, Materialized};
use chrono::{SecondsFormat, Utc};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct IngestArgs {
    pub os_type: String,
    /// Listing file, or `-` for stdin
    pub file: PathBuf,
    pub machine_name: Option<String>,
    pub machine_id: Option<String>,
    pub timestamp: Option<String>,
}

fn read_listing(path: &Path) -> Result<String, CliError> {
    if path == Path::new("-") {
        let mut content = String::new();
        std::io::stdin().read_to_string(&mut content)?;
        return Ok(content);
    }
    std::fs::read_to_string(path).map_err(|e| {
        CliError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read listing '{}': {}", path.display(), e),
        ))
    })
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Build the request, filling metadata the caller left out
pub fn build_request(args: IngestArgs, content: String) -> IngestRequest {
    let machine_name = args.machine_name.unwrap_or_else(local_hostname);
    let machine_id = args.machine_id.unwrap_or_else(|| machine_name.clone());
    let timestamp = args
        .timestamp
        .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

    IngestRequest {
        os_type: Some(args.os_type.clone()),
        content: Some(content),
        meta_info: BatchMetaInfo {
            timestamp,
            machine_name,
            machine_id,
            os_type: args.os_type,
        },
    }
}

/// Stage the listing and materialize it in the background, waiting for the
/// queue to drain before returning
pub async fn ingest(config: &Config, args: IngestArgs) -> Result<IngestReceipt, CliError> {
    let content = read_listing(&args.file)?;
    let storage = open_storage(config).await?;
    let pipeline = Arc::new(pipeline_for(&storage));
    let queue = MaterializeQueue::spawn(
        pipeline.clone(),
        config.pipeline.workers,
        config.pipeline.queue_size,
    );

    let receipt = pipeline.ingest(build_request(args, content)).await?;
    queue.submit(receipt.batch_id.clone()).await?;
    queue.shutdown().await;

    info!(batch_id = %receipt.batch_id, count = receipt.record_count, "Ingest complete");
    Ok(receipt)
}

pub async fn run_ingest(config: &Config, args: IngestArgs) -> Result<(), CliError> {
    let receipt = ingest(config, args).await?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

/// Materialize a batch left staged by an earlier run
pub async fn materialize(config: &Config, batch_id: &str) -> Result<Materialized, CliError> {
    let storage = open_storage(config).await?;
    let pipeline = pipeline_for(&storage);
    Ok(pipeline.materialize(batch_id).await?)
}

pub async fn run_materialize(config: &Config, batch_id: &str) -> Result<(), CliError> {
    match materialize(config, batch_id).await? {
        Materialized::Stored {
            records,
            partitions,
        } => {
            println!(
                "Materialized {}: {} records across {} partitions",
                batch_id, records, partitions
            );
            Ok(())
        }
        Materialized::Missing => Err(CliError::NotFound(format!(
            "no staged batch with id {}",
            batch_id
        ))),
        Materialized::Invalid => Err(CliError::NotFound(format!(
            "staged batch {} is invalid and was left in place",
            batch_id
        ))),
    }
}
