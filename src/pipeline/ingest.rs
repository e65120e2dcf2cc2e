use crate::model::{
    parse_timestamp, rollup_key, AggregateRollup, BatchMetaInfo, ProcessRecord, StagedBatch,
    TopCpuProcess, TopMemoryProcess, TOP_N,
};
use crate::parser::{ParseError, Parser};
use crate::storage::{KeyValueStore, RecordStore, StorageError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Process-wide sequence appended to batch ids so that two ingests in the
/// same second never collide
static BATCH_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to encode staged batch: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to encode rollup: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("materialize queue is closed")]
    QueueClosed,
}

/// Raw listing plus metadata, as handed over by the API layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub os_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub meta_info: BatchMetaInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub batch_id: String,
    pub record_count: usize,
}

/// Outcome of one materialize call
#[derive(Debug, Clone, PartialEq)]
pub enum Materialized {
    /// Records written, rollups rebuilt and the staged batch removed
    Stored { records: usize, partitions: usize },
    /// Nothing staged under the id
    Missing,
    /// Staged payload unusable; left in place
    Invalid,
}

pub fn next_batch_id() -> String {
    let seq = BATCH_SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed);
    format!("batch_{}_{:06}", Utc::now().format("%Y%m%d%H%M%S"), seq)
}

/// Parse -> stage -> materialize -> aggregate -> evict staging
pub struct IngestionPipeline {
    staging: Arc<dyn KeyValueStore>,
    records: Arc<dyn RecordStore>,
    rollups: Arc<dyn KeyValueStore>,
}

impl IngestionPipeline {
    pub fn new(
        staging: Arc<dyn KeyValueStore>,
        records: Arc<dyn RecordStore>,
        rollups: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            staging,
            records,
            rollups,
        }
    }

    /// Parse the listing and stage it; materialization happens later.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReceipt, IngestError> {
        let os_type = request
            .os_type
            .filter(|s| !s.is_empty())
            .ok_or(IngestError::MissingField("os_type"))?;
        let content = request
            .content
            .filter(|s| !s.is_empty())
            .ok_or(IngestError::MissingField("content"))?;

        let parser = Parser::for_os_type(&os_type)?;
        let process_data = parser.parse(&content)?;
        let record_count = process_data.len();

        let batch_id = next_batch_id();
        let staged = StagedBatch {
            meta_info: request.meta_info,
            process_data,
        };
        self.staging
            .set(&batch_id, serde_json::to_string(&staged)?)
            .await?;

        info!(batch_id = %batch_id, os_type = %os_type, count = record_count, "Staged batch");
        Ok(IngestReceipt {
            batch_id,
            record_count,
        })
    }

    /// Move a staged batch into durable storage and rebuild the rollups of the
    /// partitions it touches.
    ///
    /// A missing or malformed batch is logged and skipped. A failed insert
    /// leaves the batch staged.
    pub async fn materialize(&self, batch_id: &str) -> Result<Materialized, PipelineError> {
        let Some(raw) = self.staging.get(batch_id).await? else {
            warn!(batch_id = %batch_id, "No staged data found for batch");
            return Ok(Materialized::Missing);
        };

        let Some(records) = decode_staged(batch_id, &raw) else {
            return Ok(Materialized::Invalid);
        };

        let inserted = self.records.insert_records(&records).await?;
        debug!(batch_id = %batch_id, count = inserted, "Inserted batch records");

        let rollups = compute_rollups(&records);
        for rollup in &rollups {
            // Overwrites whatever an earlier batch left for this partition
            self.rollups
                .set(&rollup_key(&rollup.partition_key), serde_json::to_string(rollup)?)
                .await?;
        }

        self.staging.delete(batch_id).await?;

        info!(
            batch_id = %batch_id,
            records = inserted,
            partitions = rollups.len(),
            "Materialized batch"
        );
        Ok(Materialized::Stored {
            records: inserted,
            partitions: rollups.len(),
        })
    }
}

/// Validate the staged envelope and merge its metadata into every record
fn decode_staged(batch_id: &str, raw: &str) -> Option<Vec<ProcessRecord>> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(batch_id = %batch_id, error = %e, "Staged batch is not valid JSON");
            return None;
        }
    };

    if value.get("process_data").is_none() || value.get("meta_info").is_none() {
        warn!(batch_id = %batch_id, "Staged batch is missing process_data or meta_info");
        return None;
    }

    let staged: StagedBatch = match serde_json::from_value(value) {
        Ok(s) => s,
        Err(e) => {
            warn!(batch_id = %batch_id, error = %e, "Staged batch has an unexpected shape");
            return None;
        }
    };

    let Some(timestamp) = parse_timestamp(&staged.meta_info.timestamp) else {
        warn!(
            batch_id = %batch_id,
            timestamp = %staged.meta_info.timestamp,
            "Staged batch has no usable timestamp"
        );
        return None;
    };

    let meta = staged.meta_info;
    let records = staged
        .process_data
        .into_iter()
        .map(|mut record| {
            record.timestamp = Some(timestamp);
            record.machine_name = meta.machine_name.clone();
            record.machine_id = meta.machine_id.clone();
            record.os_type = meta.os_type.clone();
            record
        })
        .collect();
    Some(records)
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// One rollup per partition key present in `records`, ordered by key.
///
/// Top-N lists are stable: equal values keep encounter order.
pub fn compute_rollups(records: &[ProcessRecord]) -> Vec<AggregateRollup> {
    let mut partitions: BTreeMap<String, Vec<&ProcessRecord>> = BTreeMap::new();
    for record in records {
        if let Some(key) = record.partition_key() {
            partitions.entry(key).or_default().push(record);
        }
    }

    partitions
        .into_iter()
        .map(|(partition_key, members)| {
            let commands: HashSet<&str> = members.iter().map(|r| r.command.as_str()).collect();

            let mut by_cpu = members.clone();
            by_cpu.sort_by(|a, b| descending(a.cpu_usage, b.cpu_usage));
            let mut by_mem = members.clone();
            by_mem.sort_by(|a, b| descending(a.mem_usage, b.mem_usage));

            AggregateRollup {
                total_cpu_usage: members.iter().map(|r| r.cpu_usage).sum(),
                total_memory_usage: members.iter().map(|r| r.mem_usage).sum(),
                process_count: commands.len(),
                top_cpu_processes: by_cpu
                    .iter()
                    .take(TOP_N)
                    .map(|r| TopCpuProcess {
                        command: r.command.clone(),
                        cpu_usage: r.cpu_usage,
                    })
                    .collect(),
                top_memory_processes: by_mem
                    .iter()
                    .take(TOP_N)
                    .map(|r| TopMemoryProcess {
                        command: r.command.clone(),
                        mem_usage: r.mem_usage,
                    })
                    .collect(),
                partition_key,
            }
        })
        .collect()
}
