use proclens::model::{AggregateRollup, BatchMetaInfo};
use proclens::parser::ParseError;
use proclens::pipeline::{
    IngestError, IngestRequest, IngestionPipeline, MaterializeQueue, Materialized,
};
use proclens::storage::duckdb::DuckDbStorage;
use proclens::storage::{KeyValueStore, MemoryKvStore, RecordQuery, RecordStore};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

const UNIX_LISTING: &str = "\
USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND
root 1 0.5 0.1 168000 11800 ? Ss Jan27 0:05 /sbin/init splash
www 812 12.0 2.5 900000 204800 ? Sl Jan27 3:10 nginx: worker process
";

const WINDOWS_LISTING: &str = "\
Image Name                     PID Session Name        Session#    Mem Usage
========================= ======== ================ =========== ============
System Idle Process              0 Services                   0          8 K
explorer.exe                  4120 Console                    1     98,304 K
";

struct Harness {
    pipeline: IngestionPipeline,
    staging: Arc<MemoryKvStore>,
    records: Arc<DuckDbStorage>,
    rollups: Arc<MemoryKvStore>,
}

async fn harness() -> Harness {
    let staging = Arc::new(MemoryKvStore::new());
    let rollups = Arc::new(MemoryKvStore::new());
    let records = Arc::new(DuckDbStorage::in_memory().unwrap());
    records.init_schema().await.unwrap();
    Harness {
        pipeline: IngestionPipeline::new(staging.clone(), records.clone(), rollups.clone()),
        staging,
        records,
        rollups,
    }
}

fn request(os_type: &str, content: &str, timestamp: &str) -> IngestRequest {
    IngestRequest {
        os_type: Some(os_type.to_string()),
        content: Some(content.to_string()),
        meta_info: BatchMetaInfo {
            timestamp: timestamp.to_string(),
            machine_name: "host-a".to_string(),
            machine_id: "id-a".to_string(),
            os_type: os_type.to_string(),
        },
    }
}

async fn rollup(store: &MemoryKvStore, partition_key: &str) -> AggregateRollup {
    let raw = store
        .get(&format!("agg_{}", partition_key))
        .await
        .unwrap()
        .expect("rollup should exist");
    serde_json::from_str(&raw).unwrap()
}

fn whole_day() -> RecordQuery {
    RecordQuery::new(
        Utc.with_ymd_and_hms(2026, 1, 28, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 1, 28, 23, 59, 59).unwrap(),
    )
}

#[tokio::test]
async fn test_unix_batch_end_to_end() {
    let h = harness().await;

    let receipt = h
        .pipeline
        .ingest(request("linux", UNIX_LISTING, "2026-01-28T09:30:00Z"))
        .await
        .unwrap();
    assert_eq!(receipt.record_count, 2);
    assert!(h.staging.get(&receipt.batch_id).await.unwrap().is_some());

    let outcome = h.pipeline.materialize(&receipt.batch_id).await.unwrap();
    assert_eq!(
        outcome,
        Materialized::Stored {
            records: 2,
            partitions: 1
        }
    );

    let rows = h.records.query_records(&whole_day()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["command"], "/sbin/init splash");
    assert_eq!(rows[1]["command"], "nginx: worker process");
    assert_eq!(rows[1]["machine_name"], "host-a");

    let agg = rollup(&h.rollups, "2026-01-28_linux").await;
    assert_eq!(agg.process_count, 2);
    assert!((agg.total_cpu_usage - 12.5).abs() < 1e-9);
    assert_eq!(agg.top_cpu_processes[0].command, "nginx: worker process");

    assert!(h.staging.is_empty());
}

#[tokio::test]
async fn test_windows_batch_end_to_end() {
    let h = harness().await;

    let receipt = h
        .pipeline
        .ingest(request("Windows", WINDOWS_LISTING, "2026-01-28T12:00:00Z"))
        .await
        .unwrap();
    assert_eq!(receipt.record_count, 2);
    h.pipeline.materialize(&receipt.batch_id).await.unwrap();

    let agg = rollup(&h.rollups, "2026-01-28_Windows").await;
    assert_eq!(agg.process_count, 2);
    assert_eq!(agg.top_memory_processes[0].command, "explorer.exe");
    assert!((agg.top_memory_processes[0].mem_usage - 98304.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_second_batch_overwrites_rollup() {
    let h = harness().await;

    let first = h
        .pipeline
        .ingest(request("linux", UNIX_LISTING, "2026-01-28T09:00:00Z"))
        .await
        .unwrap();
    h.pipeline.materialize(&first.batch_id).await.unwrap();

    let single = "\
USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND
app 4242 3.0 1.0 10000 2000 ? S 10:00 0:01 /usr/bin/worker
";
    let second = h
        .pipeline
        .ingest(request("linux", single, "2026-01-28T18:00:00Z"))
        .await
        .unwrap();
    h.pipeline.materialize(&second.batch_id).await.unwrap();

    // durable rows accumulate, the rollup reflects only the latest batch
    assert_eq!(h.records.query_records(&whole_day()).await.unwrap().len(), 3);
    let agg = rollup(&h.rollups, "2026-01-28_linux").await;
    assert_eq!(agg.process_count, 1);
    assert!((agg.total_cpu_usage - 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_rejected_ingest_stages_nothing() {
    let h = harness().await;

    let err = h
        .pipeline
        .ingest(request("linux", "PID COMMAND\n1 init\n", "2026-01-28T09:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Parse(ParseError::Format { .. })));

    let err = h
        .pipeline
        .ingest(request("beos", UNIX_LISTING, "2026-01-28T09:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Parse(ParseError::UnsupportedOs(ref tag)) if tag == "beos"));

    let mut missing = request("linux", UNIX_LISTING, "2026-01-28T09:00:00Z");
    missing.content = None;
    assert!(matches!(
        h.pipeline.ingest(missing).await,
        Err(IngestError::MissingField("content"))
    ));

    assert!(h.staging.is_empty());
}

#[tokio::test]
async fn test_unusable_batches_stay_staged() {
    let h = harness().await;

    let receipt = h
        .pipeline
        .ingest(request("linux", UNIX_LISTING, "not a time"))
        .await
        .unwrap();
    assert_eq!(
        h.pipeline.materialize(&receipt.batch_id).await.unwrap(),
        Materialized::Invalid
    );
    assert!(h.staging.get(&receipt.batch_id).await.unwrap().is_some());
    assert!(h.rollups.is_empty());
    assert!(h.records.query_records(&whole_day()).await.unwrap().is_empty());

    assert_eq!(
        h.pipeline.materialize("batch_never_staged").await.unwrap(),
        Materialized::Missing
    );
}

#[tokio::test]
async fn test_queue_materializes_concurrent_ingests() {
    let h = harness().await;
    let pipeline = Arc::new(h.pipeline);
    let queue = MaterializeQueue::spawn(pipeline.clone(), 3, 2);

    let mut ids = Vec::new();
    for hour in 0..6 {
        let receipt = pipeline
            .ingest(request(
                "linux",
                UNIX_LISTING,
                &format!("2026-01-28T{:02}:00:00Z", hour),
            ))
            .await
            .unwrap();
        ids.push(receipt.batch_id.clone());
        queue.submit(receipt.batch_id).await.unwrap();
    }
    queue.shutdown().await;

    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 6);

    assert!(h.staging.is_empty());
    assert_eq!(h.records.query_records(&whole_day()).await.unwrap().len(), 12);
    assert_eq!(rollup(&h.rollups, "2026-01-28_linux").await.process_count, 2);
}

#[tokio::test]
async fn test_staged_batches_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("proclens.duckdb");

    let batch_id = {
        let storage = Arc::new(DuckDbStorage::new(&path).unwrap());
        storage.init_schema().await.unwrap();
        let pipeline = IngestionPipeline::new(storage.clone(), storage.clone(), storage.clone());
        pipeline
            .ingest(request("mac", UNIX_LISTING, "2026-01-28T09:00:00Z"))
            .await
            .unwrap()
            .batch_id
    };

    let storage = Arc::new(DuckDbStorage::new(&path).unwrap());
    storage.init_schema().await.unwrap();
    let pipeline = IngestionPipeline::new(storage.clone(), storage.clone(), storage.clone());
    let outcome = pipeline.materialize(&batch_id).await.unwrap();
    assert!(matches!(outcome, Materialized::Stored { records: 2, .. }));

    assert!(KeyValueStore::get(storage.as_ref(), &batch_id).await.unwrap().is_none());
    assert!(KeyValueStore::get(storage.as_ref(), "agg_2026-01-28_mac")
        .await
        .unwrap()
        .is_some());
}
