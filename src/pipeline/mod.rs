pub mod ingest;
pub mod worker;

pub use ingest::{
    compute_rollups, next_batch_id, IngestError, IngestReceipt, IngestRequest, IngestionPipeline,
    Materialized, PipelineError,
};
pub use worker::MaterializeQueue;
