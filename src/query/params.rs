use super::QueryError;
use crate::model::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: i64 = 100;

/// Query request as received from the API layer. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(rename = "type")]
    pub query_type: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub os_type: Option<String>,
    pub machine_id: Option<String>,
    pub command: Option<String>,
    pub cpu_usage_gt: Option<f64>,
    pub memory_usage_gt: Option<f64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub aggregations: Option<Vec<String>>,
    pub group_by: Option<Vec<String>>,
}

impl QueryParams {
    /// Read parameters from a loosely typed JSON mapping; unknown keys are ignored
    pub fn from_value(value: serde_json::Value) -> Result<Self, QueryError> {
        serde_json::from_value(value).map_err(|e| QueryError::InvalidParameter {
            name: "query".to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Historical,
    RealTime,
}

/// Parameters with structural defaults filled in
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedQuery {
    pub kind: QueryKind,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub os_type: Option<String>,
    pub machine_id: Option<String>,
    pub command: Option<String>,
    pub cpu_usage_gt: Option<f64>,
    pub memory_usage_gt: Option<f64>,
    pub limit: i64,
    pub offset: i64,
    pub aggregations: Vec<String>,
    pub group_by: Vec<String>,
}

fn timestamp_param(name: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>, QueryError> {
    match value {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| QueryError::InvalidParameter {
                name: name.to_string(),
                reason: format!("'{}' is not an ISO-8601 timestamp", raw),
            }),
    }
}

pub fn normalize(params: QueryParams) -> Result<NormalizedQuery, QueryError> {
    let kind = match params.query_type.as_deref() {
        Some("real_time") => QueryKind::RealTime,
        _ => QueryKind::Historical,
    };

    Ok(NormalizedQuery {
        kind,
        start_time: timestamp_param("start_time", params.start_time)?,
        end_time: timestamp_param("end_time", params.end_time)?,
        os_type: params.os_type,
        machine_id: params.machine_id,
        command: params.command,
        cpu_usage_gt: params.cpu_usage_gt,
        memory_usage_gt: params.memory_usage_gt,
        limit: params.limit.unwrap_or(DEFAULT_LIMIT),
        offset: params.offset.unwrap_or(0),
        aggregations: params.aggregations.unwrap_or_default(),
        group_by: params.group_by.unwrap_or_default(),
    })
}
