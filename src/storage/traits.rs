use crate::model::{ProcessRecord, StoredRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("transaction rolled back: {0}")]
    Transaction(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage lock poisoned")]
    Lock,
}

/// A row of a query result, as plain field mappings
pub type Row = Map<String, Value>;

/// Durable store of individual process records
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// Insert all records in a single transaction: every row lands or none do.
    /// Every record must carry a timestamp.
    async fn insert_records(&self, records: &[ProcessRecord]) -> Result<usize, StorageError>;

    async fn query_records(&self, query: &RecordQuery) -> Result<Vec<Row>, StorageError>;

    async fn get_record(&self, id: i64) -> Result<Option<StoredRecord>, StorageError>;
}

/// Flat string key-value store, used both for staged batches and rollups
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
}

/// Columns of the durable record schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordColumn {
    Id,
    Command,
    Pid,
    Vsz,
    Rss,
    CpuUsage,
    MemUsage,
    Tty,
    Stat,
    StartTime,
    Duration,
    User,
    Timestamp,
    MachineName,
    MachineId,
    OsType,
}

impl RecordColumn {
    pub const ALL: [RecordColumn; 16] = [
        RecordColumn::Id,
        RecordColumn::Command,
        RecordColumn::Pid,
        RecordColumn::Vsz,
        RecordColumn::Rss,
        RecordColumn::CpuUsage,
        RecordColumn::MemUsage,
        RecordColumn::Tty,
        RecordColumn::Stat,
        RecordColumn::StartTime,
        RecordColumn::Duration,
        RecordColumn::User,
        RecordColumn::Timestamp,
        RecordColumn::MachineName,
        RecordColumn::MachineId,
        RecordColumn::OsType,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RecordColumn::Id => "id",
            RecordColumn::Command => "command",
            RecordColumn::Pid => "pid",
            RecordColumn::Vsz => "vsz",
            RecordColumn::Rss => "rss",
            RecordColumn::CpuUsage => "cpu_usage",
            RecordColumn::MemUsage => "mem_usage",
            RecordColumn::Tty => "tty",
            RecordColumn::Stat => "stat",
            RecordColumn::StartTime => "start_time",
            RecordColumn::Duration => "duration",
            RecordColumn::User => "user",
            RecordColumn::Timestamp => "timestamp",
            RecordColumn::MachineName => "machine_name",
            RecordColumn::MachineId => "machine_id",
            RecordColumn::OsType => "os_type",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|col| col.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Avg,
    Max,
    Min,
    Sum,
    Count,
}

impl AggregateFn {
    /// Unrecognized names fall back to avg
    pub fn from_name(name: &str) -> Self {
        match name {
            "max" => AggregateFn::Max,
            "min" => AggregateFn::Min,
            "sum" => AggregateFn::Sum,
            "count" => AggregateFn::Count,
            _ => AggregateFn::Avg,
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            AggregateFn::Avg => "AVG",
            AggregateFn::Max => "MAX",
            AggregateFn::Min => "MIN",
            AggregateFn::Sum => "SUM",
            AggregateFn::Count => "COUNT",
        }
    }
}

/// `<fn>_<column>` projection, labelled with the requested name
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub label: String,
    pub func: AggregateFn,
    pub column: RecordColumn,
}

impl AggregateExpr {
    /// Resolve `avg_cpu_usage` style names; None when there is no underscore
    /// or the column is not part of the record schema
    pub fn parse(name: &str) -> Option<Self> {
        let (func, column) = name.split_once('_')?;
        let column = RecordColumn::from_name(column)?;
        Some(AggregateExpr {
            label: name.to_string(),
            func: AggregateFn::from_name(func),
            column,
        })
    }
}

/// Filtered lookup against the durable store
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub os_type: Option<String>,
    pub machine_id: Option<String>,
    /// Case-insensitive substring
    pub command: Option<String>,
    pub cpu_usage_gt: Option<f64>,
    pub mem_usage_gt: Option<f64>,
    pub group_by: Vec<RecordColumn>,
    pub aggregates: Vec<AggregateExpr>,
    pub limit: usize,
    pub offset: usize,
}

impl RecordQuery {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            os_type: None,
            machine_id: None,
            command: None,
            cpu_usage_gt: None,
            mem_usage_gt: None,
            group_by: Vec::new(),
            aggregates: Vec::new(),
            limit: 100,
            offset: 0,
        }
    }

    /// Whether rows are projections rather than full records
    pub fn is_projection(&self) -> bool {
        !self.group_by.is_empty() || !self.aggregates.is_empty()
    }
}
