use proclens::model::BatchMetaInfo;
use proclens::pipeline::{IngestRequest, IngestionPipeline};
use proclens::query::{QueryError, QueryLimits, QueryParams, QueryPlanner};
use proclens::storage::duckdb::DuckDbStorage;
use proclens::storage::{MemoryKvStore, RecordStore};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

const DAY_ONE: &str = "\
USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND
root 1 0.5 0.1 168000 11800 ? Ss Jan27 0:05 /sbin/init
www 812 12.0 2.5 900000 204800 ? Sl Jan27 3:10 nginx: worker process
www 813 8.0 2.0 900000 190000 ? Sl Jan27 2:40 nginx: worker process
";

const DAY_TWO: &str = "\
USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND
pg 77 30.0 9.5 2000000 800000 ? Ss Jan28 9:00 postgres: writer
";

struct Fixture {
    planner: QueryPlanner,
    rollups: Arc<MemoryKvStore>,
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

async fn ingest(
    pipeline: &IngestionPipeline,
    os_type: &str,
    machine_id: &str,
    content: &str,
    timestamp: &str,
) {
    let receipt = pipeline
        .ingest(IngestRequest {
            os_type: Some(os_type.to_string()),
            content: Some(content.to_string()),
            meta_info: BatchMetaInfo {
                timestamp: timestamp.to_string(),
                machine_name: machine_id.to_uppercase(),
                machine_id: machine_id.to_string(),
                os_type: os_type.to_string(),
            },
        })
        .await
        .unwrap();
    pipeline.materialize(&receipt.batch_id).await.unwrap();
}

async fn fixture() -> Fixture {
    let records = Arc::new(DuckDbStorage::in_memory().unwrap());
    records.init_schema().await.unwrap();
    let rollups = Arc::new(MemoryKvStore::new());
    let pipeline = IngestionPipeline::new(
        Arc::new(MemoryKvStore::new()),
        records.clone(),
        rollups.clone(),
    );

    ingest(&pipeline, "linux", "m-1", DAY_ONE, "2026-01-27T10:00:00Z").await;
    ingest(&pipeline, "linux", "m-2", DAY_TWO, "2026-01-28T10:00:00Z").await;
    ingest(&pipeline, "mac", "m-3", DAY_TWO, "2026-01-27T11:00:00Z").await;

    Fixture {
        planner: QueryPlanner::new(records, rollups.clone(), QueryLimits::default()),
        rollups,
    }
}

fn params(value: serde_json::Value) -> QueryParams {
    QueryParams::from_value(value).unwrap()
}

#[tokio::test]
async fn test_pre_aggregated_rows_in_date_then_os_order() {
    let f = fixture().await;
    let result = f
        .planner
        .execute_at(
            params(json!({
                "start_time": "2026-01-26T00:00:00Z",
                "end_time": "2026-01-29T00:00:00Z",
                "aggregations": ["total_cpu_usage", "process_count"]
            })),
            now(),
        )
        .await
        .unwrap();

    let keys: Vec<&str> = result
        .records
        .iter()
        .map(|r| r["partition_key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["2026-01-27_linux", "2026-01-27_mac", "2026-01-28_linux"]);
    assert_eq!(result.total_count, 3);
    assert_eq!(result.records[0]["process_count"], 2);
    assert_eq!(result.records[0]["total_cpu_usage"], 20.5);

    assert_eq!(f.planner.cache().len(), 3);
}

#[tokio::test]
async fn test_pre_aggregated_os_filter_and_ignored_filters() {
    let f = fixture().await;
    let result = f
        .planner
        .execute_at(
            params(json!({
                "start_time": "2026-01-27T00:00:00Z",
                "end_time": "2026-01-28T00:00:00Z",
                "os_type": "mac",
                "machine_id": "does-not-matter",
                "cpu_usage_gt": 99.0,
                "limit": 1,
                "offset": 4,
                "aggregations": ["total_memory_usage"]
            })),
            now(),
        )
        .await
        .unwrap();

    assert_eq!(result.total_count, 1);
    assert_eq!(result.records[0]["partition_key"], "2026-01-27_mac");
}

#[tokio::test]
async fn test_cache_serves_stale_rollups() {
    let f = fixture().await;
    let query = json!({
        "start_time": "2026-01-28T00:00:00Z",
        "end_time": "2026-01-28T23:00:00Z",
        "os_type": "linux",
        "aggregations": ["process_count"]
    });

    let first = f.planner.execute_at(params(query.clone()), now()).await.unwrap();
    assert_eq!(first.records[0]["process_count"], 1);

    // a later batch rewrites the rollup behind the planner's back
    let store = Arc::new(DuckDbStorage::in_memory().unwrap());
    store.init_schema().await.unwrap();
    let pipeline = IngestionPipeline::new(Arc::new(MemoryKvStore::new()), store, f.rollups.clone());
    ingest(&pipeline, "linux", "m-9", DAY_ONE, "2026-01-28T20:00:00Z").await;

    let second = f.planner.execute_at(params(query), now()).await.unwrap();
    assert_eq!(second.records[0]["process_count"], 1);
}

#[tokio::test]
async fn test_primary_store_filters() {
    let f = fixture().await;
    let result = f
        .planner
        .execute_at(
            params(json!({
                "start_time": "2026-01-27T00:00:00Z",
                "end_time": "2026-01-28T23:59:59Z",
                "os_type": "linux",
                "command": "NGINX",
                "cpu_usage_gt": 8.0
            })),
            now(),
        )
        .await
        .unwrap();

    assert_eq!(result.total_count, 1);
    assert_eq!(result.records[0]["pid"], 812);
    assert_eq!(result.records[0]["machine_id"], "m-1");
}

#[tokio::test]
async fn test_primary_store_grouped_aggregates() {
    let f = fixture().await;
    let result = f
        .planner
        .execute_at(
            params(json!({
                "start_time": "2026-01-27T00:00:00Z",
                "end_time": "2026-01-28T23:59:59Z",
                "group_by": ["os_type", "bogus"],
                "aggregations": ["max_cpu_usage", "count_pid", "median_nothing"]
            })),
            now(),
        )
        .await
        .unwrap();

    assert_eq!(result.total_count, 2);
    assert_eq!(result.records[0]["os_type"], "linux");
    assert_eq!(result.records[0]["count_pid"], 4);
    assert_eq!(result.records[0]["max_cpu_usage"], 30.0);
    assert_eq!(result.records[1]["os_type"], "mac");
    assert_eq!(result.records[1]["count_pid"], 1);
    assert!(result.records[0].get("median_nothing").is_none());
}

#[tokio::test]
async fn test_primary_store_pagination() {
    let f = fixture().await;
    let base = json!({
        "start_time": "2026-01-27T00:00:00Z",
        "end_time": "2026-01-28T23:59:59Z",
        "limit": 2
    });

    let page_one = f.planner.execute_at(params(base.clone()), now()).await.unwrap();
    let mut second = base;
    second["offset"] = json!(2);
    let page_two = f.planner.execute_at(params(second), now()).await.unwrap();

    assert_eq!(page_one.total_count, 2);
    assert_eq!(page_two.total_count, 2);
    assert_ne!(page_one.records[0]["id"], page_two.records[0]["id"]);
}

#[tokio::test]
async fn test_default_window_excludes_old_data() {
    let f = fixture().await;
    let far_future = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
    let result = f
        .planner
        .execute_at(QueryParams::default(), far_future)
        .await
        .unwrap();
    assert_eq!(result.total_count, 0);

    let result = f.planner.execute_at(QueryParams::default(), now()).await.unwrap();
    assert_eq!(result.total_count, 5);
}

#[tokio::test]
async fn test_real_time_and_bad_params() {
    let f = fixture().await;
    let err = f
        .planner
        .execute_at(params(json!({"type": "real_time"})), now())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::NotImplemented(_)));

    let err = f
        .planner
        .execute_at(params(json!({"start_time": "yesterday"})), now())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidParameter { .. }));
}
