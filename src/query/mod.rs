pub mod cache;
pub mod params;
pub mod planner;

use crate::storage::StorageError;
use thiserror::Error;

pub use cache::RollupCache;
pub use params::{normalize, NormalizedQuery, QueryKind, QueryParams};
pub use planner::{
    optimize, optimize_aggregations, select_source, DataSource, OptimizedQuery, QueryFilters,
    QueryLimits, QueryPlanner, QueryResult,
};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("invalid query parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
