pub mod duckdb;
pub mod memory;
pub mod traits;

pub use memory::MemoryKvStore;
pub use traits::{
    AggregateExpr, AggregateFn, KeyValueStore, RecordColumn, RecordQuery, RecordStore, Row,
    StorageError,
};
