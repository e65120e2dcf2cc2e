use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder for fields a listing format does not report
pub const NOT_AVAILABLE: &str = "N/A";

/// Number of entries kept in each top-N list of a rollup
pub const TOP_N: usize = 10;

/// One normalized observation of a single OS process.
///
/// Parsers fill the listing fields. The machine and timestamp fields stay
/// empty until the batch is materialized and its metadata merged in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub command: String,
    pub pid: i64,
    pub vsz: i64,
    pub rss: i64,
    pub cpu_usage: f64,
    pub mem_usage: f64,
    pub tty: String,
    pub stat: String,
    pub start_time: String,
    pub duration: String,
    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub machine_name: String,
    #[serde(default)]
    pub machine_id: String,
    #[serde(default)]
    pub os_type: String,
}

impl ProcessRecord {
    /// Partition key `YYYY-MM-DD_<os_type>`, or None before the timestamp is merged
    pub fn partition_key(&self) -> Option<String> {
        self.timestamp
            .map(|ts| partition_key(ts.date_naive(), &self.os_type))
    }
}

pub fn partition_key(date: NaiveDate, os_type: &str) -> String {
    format!("{}_{}", date.format("%Y-%m-%d"), os_type)
}

/// Key under which a partition's rollup lives in the rollup store
pub fn rollup_key(partition_key: &str) -> String {
    format!("agg_{}", partition_key)
}

/// A durable row: the record plus the id the record store assigned to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    #[serde(flatten)]
    pub record: ProcessRecord,
}

/// Metadata supplied by the caller for a whole batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchMetaInfo {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub machine_name: String,
    #[serde(default)]
    pub machine_id: String,
    #[serde(default)]
    pub os_type: String,
}

/// Envelope persisted in the staging store between ingest and materialize
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedBatch {
    pub meta_info: BatchMetaInfo,
    pub process_data: Vec<ProcessRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopCpuProcess {
    pub command: String,
    pub cpu_usage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopMemoryProcess {
    pub command: String,
    pub mem_usage: f64,
}

/// Precomputed aggregate for one (day, os_type) partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRollup {
    pub partition_key: String,
    pub total_cpu_usage: f64,
    pub total_memory_usage: f64,
    /// Distinct command count
    pub process_count: usize,
    pub top_cpu_processes: Vec<TopCpuProcess>,
    pub top_memory_processes: Vec<TopMemoryProcess>,
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 with an offset, naive `YYYY-MM-DDTHH:MM:SS[.f]` (or with a
/// space separator) and a bare date. Naive values are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
