use super::cache::{RollupCache, DEFAULT_CAPACITY};
use super::params::{normalize, NormalizedQuery, QueryKind, QueryParams};
use super::QueryError;
use crate::model::partition_key;
use crate::storage::{AggregateExpr, KeyValueStore, RecordColumn, RecordQuery, RecordStore, Row};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// OS types scanned by the pre-aggregated path when no os filter is given
pub const DEFAULT_OS_TYPES: [&str; 3] = ["windows", "linux", "mac"];

/// Aggregations answerable from a partition rollup alone
pub const ROLLUP_AGGREGATIONS: [&str; 3] = ["total_cpu_usage", "total_memory_usage", "process_count"];

/// Aggregation prefixes in evaluation order; anything else sorts last
const AGGREGATION_PRIORITY: [&str; 5] = ["count", "sum", "avg", "min", "max"];

/// Bounds applied to every query before it reaches storage
#[derive(Debug, Clone, PartialEq)]
pub struct QueryLimits {
    pub default_window: Duration,
    pub max_window: Duration,
    pub default_limit: usize,
    pub max_limit: usize,
    pub rollup_cache_capacity: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_window: Duration::days(30),
            max_window: Duration::days(365),
            default_limit: 100,
            max_limit: 1000,
            rollup_cache_capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilters {
    pub os_type: Option<String>,
    pub machine_id: Option<String>,
    pub command: Option<String>,
    pub cpu_usage_gt: Option<f64>,
    pub memory_usage_gt: Option<f64>,
}

/// Query with a concrete bounded window and clamped pagination
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedQuery {
    pub kind: QueryKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub limit: usize,
    pub offset: usize,
    pub aggregations: Vec<String>,
    pub group_by: Vec<String>,
    pub filters: QueryFilters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    PrimaryStore,
    PreAggregatedStore,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub total_count: usize,
    pub records: Vec<Row>,
}

/// Bound the time window, clamp pagination and reorder aggregations.
/// `now` anchors the default window.
pub fn optimize(query: NormalizedQuery, limits: &QueryLimits, now: DateTime<Utc>) -> OptimizedQuery {
    let mut start = query.start_time.unwrap_or(now - limits.default_window);
    let mut end = query.end_time.unwrap_or(now);
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }
    if end - start > limits.max_window {
        start = end - limits.max_window;
    }

    let max_limit = limits.max_limit.max(1);
    let limit = match query.limit {
        0 => limits.default_limit.clamp(1, max_limit),
        requested => requested.clamp(1, max_limit as i64) as usize,
    };

    OptimizedQuery {
        kind: query.kind,
        start_time: start,
        end_time: end,
        limit,
        offset: query.offset.max(0) as usize,
        aggregations: optimize_aggregations(query.aggregations),
        group_by: query.group_by,
        filters: QueryFilters {
            os_type: query.os_type,
            machine_id: query.machine_id,
            command: query.command,
            cpu_usage_gt: query.cpu_usage_gt.map(|v| v.max(0.0)),
            memory_usage_gt: query.memory_usage_gt.map(|v| v.max(0.0)),
        },
    }
}

/// Drop duplicates keeping the first occurrence, then stable sort by the
/// prefix before the first underscore
pub fn optimize_aggregations(aggregations: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique: Vec<String> = aggregations
        .into_iter()
        .filter(|a| seen.insert(a.clone()))
        .collect();
    unique.sort_by_key(|a| aggregation_priority(a));
    unique
}

fn aggregation_priority(name: &str) -> usize {
    let prefix = name.split('_').next().unwrap_or(name);
    AGGREGATION_PRIORITY
        .iter()
        .position(|p| *p == prefix)
        .unwrap_or(AGGREGATION_PRIORITY.len())
}

pub fn select_source(query: &OptimizedQuery) -> Result<DataSource, QueryError> {
    if query.kind == QueryKind::RealTime {
        return Err(QueryError::NotImplemented(
            "real-time queries require the raw data store".to_string(),
        ));
    }
    let from_rollups = !query.aggregations.is_empty()
        && query
            .aggregations
            .iter()
            .all(|a| ROLLUP_AGGREGATIONS.contains(&a.as_str()));
    if from_rollups {
        Ok(DataSource::PreAggregatedStore)
    } else {
        Ok(DataSource::PrimaryStore)
    }
}

/// Turns query parameters into reads against the record or rollup store
pub struct QueryPlanner {
    records: Arc<dyn RecordStore>,
    cache: RollupCache,
    limits: QueryLimits,
}

impl QueryPlanner {
    pub fn new(
        records: Arc<dyn RecordStore>,
        rollups: Arc<dyn KeyValueStore>,
        limits: QueryLimits,
    ) -> Self {
        let cache = RollupCache::new(rollups, limits.rollup_cache_capacity);
        Self {
            records,
            cache,
            limits,
        }
    }

    pub fn cache(&self) -> &RollupCache {
        &self.cache
    }

    /// Normalize, bound and route a query without running it
    pub fn plan(
        &self,
        params: QueryParams,
        now: DateTime<Utc>,
    ) -> Result<(OptimizedQuery, DataSource), QueryError> {
        let optimized = optimize(normalize(params)?, &self.limits, now);
        let source = select_source(&optimized)?;
        Ok((optimized, source))
    }

    pub async fn execute(&self, params: QueryParams) -> Result<QueryResult, QueryError> {
        self.execute_at(params, Utc::now()).await
    }

    /// Execute with an explicit clock for the default window
    pub async fn execute_at(
        &self,
        params: QueryParams,
        now: DateTime<Utc>,
    ) -> Result<QueryResult, QueryError> {
        let (query, source) = self.plan(params, now)?;
        debug!(
            source = ?source,
            start = %query.start_time,
            end = %query.end_time,
            limit = query.limit,
            offset = query.offset,
            "Executing query"
        );

        let records = match source {
            DataSource::PreAggregatedStore => self.execute_pre_aggregated(&query).await?,
            DataSource::PrimaryStore => self.execute_primary(&query).await?,
        };

        info!(source = ?source, total_count = records.len(), "Query complete");
        Ok(QueryResult {
            total_count: records.len(),
            records,
        })
    }

    /// One row per existing rollup, by date then os type. Pagination is not
    /// applied on this path.
    async fn execute_pre_aggregated(&self, query: &OptimizedQuery) -> Result<Vec<Row>, QueryError> {
        let os_types: Vec<&str> = match &query.filters.os_type {
            Some(os_type) => vec![os_type.as_str()],
            None => DEFAULT_OS_TYPES.to_vec(),
        };

        let mut rows = Vec::new();
        let end = query.end_time.date_naive();
        let mut date = query.start_time.date_naive();
        while date <= end {
            for os_type in &os_types {
                let key = partition_key(date, os_type);
                if let Some(rollup) = self.cache.get(&key).await? {
                    if let serde_json::Value::Object(row) = serde_json::to_value(&rollup)
                        .map_err(crate::storage::StorageError::from)?
                    {
                        rows.push(row);
                    }
                }
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        Ok(rows)
    }

    async fn execute_primary(&self, query: &OptimizedQuery) -> Result<Vec<Row>, QueryError> {
        let mut request = RecordQuery::new(query.start_time, query.end_time);
        request.os_type = query.filters.os_type.clone();
        request.machine_id = query.filters.machine_id.clone();
        request.command = query.filters.command.clone();
        request.cpu_usage_gt = query.filters.cpu_usage_gt;
        request.mem_usage_gt = query.filters.memory_usage_gt;
        request.group_by = query
            .group_by
            .iter()
            .filter_map(|name| RecordColumn::from_name(name))
            .collect();
        request.aggregates = query
            .aggregations
            .iter()
            .filter_map(|name| AggregateExpr::parse(name))
            .collect();
        request.limit = query.limit;
        request.offset = query.offset;

        Ok(self.records.query_records(&request).await?)
    }
}
