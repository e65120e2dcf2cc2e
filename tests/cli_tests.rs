use proclens::cli::ingest::{ingest, materialize, IngestArgs};
use proclens::cli::query::{query, show};
use proclens::cli::CliError;
use proclens::config::Config;
use proclens::pipeline::{IngestError, Materialized};
use proclens::query::QueryParams;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

const LISTING: &str = "\
USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND
root 1 0.5 0.1 168000 11800 ? Ss Jan27 0:05 /sbin/init
app 2210 4.0 1.5 500000 64000 pts/0 R+ 09:12 0:30 python3 -m http.server 8000
";

fn setup() -> (TempDir, Config) {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.path = dir.path().join("proclens.duckdb");
    config.pipeline.workers = 2;
    (dir, config)
}

fn args(dir: &TempDir, content: &str) -> IngestArgs {
    let file = dir.path().join("ps.txt");
    fs::write(&file, content).unwrap();
    IngestArgs {
        os_type: "linux".to_string(),
        file,
        machine_name: Some("build-box".to_string()),
        machine_id: None,
        timestamp: Some("2026-01-28T09:30:00Z".to_string()),
    }
}

#[tokio::test]
async fn test_ingest_then_query_and_show() {
    let (dir, config) = setup();

    let receipt = ingest(&config, args(&dir, LISTING)).await.unwrap();
    assert_eq!(receipt.record_count, 2);

    let rows = query(
        &config,
        QueryParams::from_value(json!({
            "start_time": "2026-01-28T00:00:00Z",
            "end_time": "2026-01-28T23:59:59Z",
            "command": "http.server"
        }))
        .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(rows.total_count, 1);
    assert_eq!(rows.records[0]["machine_id"], "build-box");

    let id = rows.records[0]["id"].as_i64().unwrap();
    let record = show(&config, id).await.unwrap();
    assert_eq!(record.record.command, "python3 -m http.server 8000");
    assert_eq!(record.record.pid, 2210);

    let rollups = query(
        &config,
        QueryParams::from_value(json!({
            "start_time": "2026-01-28T00:00:00Z",
            "end_time": "2026-01-28T23:59:59Z",
            "aggregations": ["process_count"]
        }))
        .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(rollups.total_count, 1);
    assert_eq!(rollups.records[0]["partition_key"], "2026-01-28_linux");

    // the queue drained, so nothing is left to materialize
    let outcome = materialize(&config, &receipt.batch_id).await.unwrap();
    assert_eq!(outcome, Materialized::Missing);
}

#[tokio::test]
async fn test_show_unknown_id() {
    let (_dir, config) = setup();
    assert!(matches!(show(&config, 424242).await, Err(CliError::NotFound(_))));
}

#[tokio::test]
async fn test_bad_listing_fails_ingest() {
    let (dir, config) = setup();
    let err = ingest(&config, args(&dir, "PID CMD\n1 init\n")).await.unwrap_err();
    assert!(matches!(err, CliError::Ingest(IngestError::Parse(_))));
}

#[tokio::test]
async fn test_missing_listing_file() {
    let (dir, config) = setup();
    let mut missing = args(&dir, LISTING);
    missing.file = dir.path().join("nope.txt");
    assert!(matches!(ingest(&config, missing).await, Err(CliError::Io(_))));
}
