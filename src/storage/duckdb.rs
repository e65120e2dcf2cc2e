use super::traits::{KeyValueStore, RecordColumn, RecordQuery, RecordStore, Row, StorageError};
use crate::model::{ProcessRecord, StoredRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::types::{TimeUnit, Value};
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

const RECORD_SELECT: &str = "SELECT id, command, pid, vsz, rss, cpu_usage, mem_usage, tty, stat, \
     start_time, duration, \"user\", epoch_us(\"timestamp\"), machine_name, machine_id, os_type \
     FROM process_data";

const RECORD_INSERT: &str = "INSERT INTO process_data (command, pid, vsz, rss, cpu_usage, mem_usage, \
     tty, stat, start_time, duration, \"user\", \"timestamp\", machine_name, machine_id, os_type) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, to_timestamp(? / 1000000.0), ?, ?, ?)";

/// DuckDB implementation of both the durable record store and the
/// key-value store used for staging and rollups
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStorage {
    /// Open (or create) a database file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Database(format!(
                        "failed to create database directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "Opened DuckDB database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory DuckDB storage instance (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock().map_err(|_| StorageError::Lock)
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Database(format!("Task join error: {}", e))
}

fn quoted(column: RecordColumn) -> String {
    format!("\"{}\"", column.name())
}

fn map_record(row: &duckdb::Row<'_>) -> duckdb::Result<StoredRecord> {
    let micros: i64 = row.get(12)?;
    let timestamp = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        duckdb::Error::FromSqlConversionFailure(
            12,
            duckdb::types::Type::BigInt,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid timestamp",
            )),
        )
    })?;

    Ok(StoredRecord {
        id: row.get(0)?,
        record: ProcessRecord {
            command: row.get(1)?,
            pid: row.get(2)?,
            vsz: row.get(3)?,
            rss: row.get(4)?,
            cpu_usage: row.get(5)?,
            mem_usage: row.get(6)?,
            tty: row.get(7)?,
            stat: row.get(8)?,
            start_time: row.get(9)?,
            duration: row.get(10)?,
            user: row.get(11)?,
            timestamp: Some(timestamp),
            machine_name: row.get(13)?,
            machine_id: row.get(14)?,
            os_type: row.get(15)?,
        },
    })
}

/// SQL text, bind values and output labels for a record query.
/// Labels are empty for full-record queries.
fn build_query(query: &RecordQuery) -> (String, Vec<Value>, Vec<String>) {
    let mut binds = vec![
        Value::BigInt(query.start.timestamp_micros()),
        Value::BigInt(query.end.timestamp_micros()),
    ];
    let mut conditions = vec![
        "\"timestamp\" >= to_timestamp(? / 1000000.0)".to_string(),
        "\"timestamp\" <= to_timestamp(? / 1000000.0)".to_string(),
    ];

    if let Some(os_type) = &query.os_type {
        conditions.push("os_type = ?".to_string());
        binds.push(Value::Text(os_type.clone()));
    }
    if let Some(machine_id) = &query.machine_id {
        conditions.push("machine_id = ?".to_string());
        binds.push(Value::Text(machine_id.clone()));
    }
    if let Some(command) = &query.command {
        conditions.push("contains(lower(command), lower(?))".to_string());
        binds.push(Value::Text(command.clone()));
    }
    if let Some(cpu) = query.cpu_usage_gt {
        conditions.push("cpu_usage > ?".to_string());
        binds.push(Value::Double(cpu));
    }
    if let Some(mem) = query.mem_usage_gt {
        conditions.push("mem_usage > ?".to_string());
        binds.push(Value::Double(mem));
    }

    let where_clause = conditions.join(" AND ");
    let mut labels = Vec::new();

    let sql = if query.is_projection() {
        let mut select = Vec::new();
        for column in &query.group_by {
            select.push(quoted(*column));
            labels.push(column.name().to_string());
        }
        for agg in &query.aggregates {
            select.push(format!(
                "{}({}) AS \"{}\"",
                agg.func.sql(),
                quoted(agg.column),
                agg.label.replace('"', "")
            ));
            labels.push(agg.label.clone());
        }

        let mut sql = format!(
            "SELECT {} FROM process_data WHERE {}",
            select.join(", "),
            where_clause
        );
        if !query.group_by.is_empty() {
            let group: Vec<String> = query.group_by.iter().map(|c| quoted(*c)).collect();
            sql.push_str(&format!(
                " GROUP BY {} ORDER BY {}",
                group.join(", "),
                group.join(", ")
            ));
        }
        sql
    } else {
        format!(
            "{} WHERE {} ORDER BY \"timestamp\", id",
            RECORD_SELECT, where_clause
        )
    };

    binds.push(Value::BigInt(query.limit as i64));
    binds.push(Value::BigInt(query.offset as i64));
    (format!("{} LIMIT ? OFFSET ?", sql), binds, labels)
}

fn value_to_json(value: Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::from(b),
        Value::TinyInt(v) => Json::from(v),
        Value::SmallInt(v) => Json::from(v),
        Value::Int(v) => Json::from(v),
        Value::BigInt(v) => Json::from(v),
        Value::HugeInt(v) => i64::try_from(v)
            .map(Json::from)
            .unwrap_or_else(|_| Json::from(v as f64)),
        Value::UTinyInt(v) => Json::from(v),
        Value::USmallInt(v) => Json::from(v),
        Value::UInt(v) => Json::from(v),
        Value::UBigInt(v) => Json::from(v),
        Value::Float(v) => Json::from(v as f64),
        Value::Double(v) => Json::from(v),
        Value::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(Json::from)
            .unwrap_or(Json::Null),
        Value::Text(s) => Json::String(s),
        Value::Timestamp(unit, v) => {
            let micros = match unit {
                TimeUnit::Second => v.saturating_mul(1_000_000),
                TimeUnit::Millisecond => v.saturating_mul(1_000),
                TimeUnit::Microsecond => v,
                TimeUnit::Nanosecond => v / 1_000,
            };
            DateTime::<Utc>::from_timestamp_micros(micros)
                .map(|ts| Json::String(ts.to_rfc3339()))
                .unwrap_or(Json::Null)
        }
        other => Json::String(format!("{:?}", other)),
    }
}

#[async_trait]
impl RecordStore for DuckDbStorage {
    async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            conn.execute_batch(
                "CREATE SEQUENCE IF NOT EXISTS process_data_id_seq START 1;

                CREATE TABLE IF NOT EXISTS process_data (
                    id BIGINT PRIMARY KEY DEFAULT nextval('process_data_id_seq'),
                    command VARCHAR NOT NULL,
                    pid BIGINT NOT NULL,
                    vsz BIGINT NOT NULL,
                    rss BIGINT NOT NULL,
                    cpu_usage DOUBLE NOT NULL,
                    mem_usage DOUBLE NOT NULL,
                    tty VARCHAR NOT NULL,
                    stat VARCHAR NOT NULL,
                    start_time VARCHAR NOT NULL,
                    duration VARCHAR NOT NULL,
                    \"user\" VARCHAR NOT NULL,
                    \"timestamp\" TIMESTAMPTZ NOT NULL,
                    machine_name VARCHAR NOT NULL,
                    machine_id VARCHAR NOT NULL,
                    os_type VARCHAR NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_process_data_timestamp ON process_data(\"timestamp\");
                CREATE INDEX IF NOT EXISTS idx_process_data_machine ON process_data(machine_id);
                CREATE INDEX IF NOT EXISTS idx_process_data_os ON process_data(os_type);

                CREATE TABLE IF NOT EXISTS kv_entries (
                    key VARCHAR PRIMARY KEY,
                    value VARCHAR NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );",
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn insert_records(&self, records: &[ProcessRecord]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.clone();
        let records = records.to_vec();

        tokio::task::spawn_blocking(move || {
            let tx_error = |e: duckdb::Error| StorageError::Transaction(e.to_string());

            let mut conn = lock(&conn)?;
            let tx = conn.transaction().map_err(tx_error)?;
            {
                let mut stmt = tx.prepare(RECORD_INSERT).map_err(tx_error)?;
                for (idx, record) in records.iter().enumerate() {
                    let timestamp = record.timestamp.ok_or_else(|| {
                        StorageError::Transaction(format!("record {} has no timestamp", idx))
                    })?;
                    stmt.execute(duckdb::params![
                        record.command,
                        record.pid,
                        record.vsz,
                        record.rss,
                        record.cpu_usage,
                        record.mem_usage,
                        record.tty,
                        record.stat,
                        record.start_time,
                        record.duration,
                        record.user,
                        timestamp.timestamp_micros(),
                        record.machine_name,
                        record.machine_id,
                        record.os_type,
                    ])
                    .map_err(tx_error)?;
                }
            }
            tx.commit().map_err(tx_error)?;

            Ok(records.len())
        })
        .await
        .map_err(join_error)?
    }

    async fn query_records(&self, query: &RecordQuery) -> Result<Vec<Row>, StorageError> {
        let conn = self.conn.clone();
        let (sql, binds, labels) = build_query(query);
        tracing::debug!(sql = %sql, "Executing record query");

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(&sql)?;
            let params = duckdb::params_from_iter(binds);

            let mut out = Vec::new();
            if labels.is_empty() {
                let rows = stmt.query_map(params, map_record)?;
                for row in rows {
                    match serde_json::to_value(row?)? {
                        serde_json::Value::Object(map) => out.push(map),
                        _ => return Err(StorageError::Database("record did not serialize to a map".to_string())),
                    }
                }
            } else {
                let mut rows = stmt.query(params)?;
                while let Some(row) = rows.next()? {
                    let mut map = Row::new();
                    for (idx, label) in labels.iter().enumerate() {
                        map.insert(label.clone(), value_to_json(row.get::<_, Value>(idx)?));
                    }
                    out.push(map);
                }
            }
            Ok(out)
        })
        .await
        .map_err(join_error)?
    }

    async fn get_record(&self, id: i64) -> Result<Option<StoredRecord>, StorageError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(&format!("{} WHERE id = ?", RECORD_SELECT))?;
            let mut rows = stmt.query(duckdb::params![id])?;

            match rows.next()? {
                Some(row) => Ok(Some(map_record(row)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(join_error)?
    }
}

#[async_trait]
impl KeyValueStore for DuckDbStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare("SELECT value FROM kv_entries WHERE key = ?")?;
            let mut rows = stmt.query(duckdb::params![key])?;

            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(join_error)?
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO kv_entries (key, value, updated_at)
                 VALUES (?, ?, to_timestamp(? / 1000000.0))",
                duckdb::params![key, value, Utc::now().timestamp_micros()],
            )?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let conn = self.conn.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let removed = conn.execute("DELETE FROM kv_entries WHERE key = ?", duckdb::params![key])?;
            Ok(removed > 0)
        })
        .await
        .map_err(join_error)?
    }
}
