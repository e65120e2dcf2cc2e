use crate::model::{rollup_key, AggregateRollup};
use crate::storage::{KeyValueStore, StorageError};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

pub const DEFAULT_CAPACITY: usize = 128;

/// Read-through LRU cache of rollups keyed by partition key.
///
/// Entries are never invalidated: a rollup overwritten in the store stays
/// stale here until evicted. Partitions without a rollup are not cached.
pub struct RollupCache {
    store: Arc<dyn KeyValueStore>,
    entries: Mutex<LruCache<String, AggregateRollup>>,
}

impl RollupCache {
    pub fn new(store: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached rollup for the partition, loading it from the store on a miss
    pub async fn get(&self, partition_key: &str) -> Result<Option<AggregateRollup>, StorageError> {
        {
            let mut entries = self.entries.lock().map_err(|_| StorageError::Lock)?;
            if let Some(rollup) = entries.get(partition_key) {
                return Ok(Some(rollup.clone()));
            }
        }

        let Some(raw) = self.store.get(&rollup_key(partition_key)).await? else {
            return Ok(None);
        };
        let rollup: AggregateRollup = serde_json::from_str(&raw)?;

        let mut entries = self.entries.lock().map_err(|_| StorageError::Lock)?;
        entries.put(partition_key.to_string(), rollup.clone());
        Ok(Some(rollup))
    }

    pub fn capacity(&self) -> usize {
        self.entries
            .lock()
            .map(|e| e.cap().get())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the key is cached, without touching its recency
    pub fn contains(&self, partition_key: &str) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains(partition_key))
            .unwrap_or(false)
    }

    /// Cached keys, most recently used first
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|e| e.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;

    fn rollup(partition_key: &str, total_cpu_usage: f64) -> AggregateRollup {
        AggregateRollup {
            partition_key: partition_key.to_string(),
            total_cpu_usage,
            total_memory_usage: 0.0,
            process_count: 1,
            top_cpu_processes: Vec::new(),
            top_memory_processes: Vec::new(),
        }
    }

    async fn store_with(keys: &[&str]) -> Arc<MemoryKvStore> {
        let store = Arc::new(MemoryKvStore::new());
        for key in keys {
            store
                .set(&rollup_key(key), serde_json::to_string(&rollup(key, 1.0)).unwrap())
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_default_capacity() {
        let cache = RollupCache::new(Arc::new(MemoryKvStore::new()), DEFAULT_CAPACITY);
        assert_eq!(cache.capacity(), 128);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_miss_loads_from_store() {
        let store = store_with(&["2026-01-01_linux"]).await;
        let cache = RollupCache::new(store, 4);

        let hit = cache.get("2026-01-01_linux").await.unwrap().unwrap();
        assert_eq!(hit.partition_key, "2026-01-01_linux");
        assert!(cache.contains("2026-01-01_linux"));

        assert!(cache.get("2026-01-01_mac").await.unwrap().is_none());
        assert!(!cache.contains("2026-01-01_mac"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used() {
        let store = store_with(&["a", "b", "c"]).await;
        let cache = RollupCache::new(store, 2);

        cache.get("a").await.unwrap();
        cache.get("b").await.unwrap();
        // touch a so b becomes the eviction candidate
        cache.get("a").await.unwrap();
        cache.get("c").await.unwrap();

        assert_eq!(cache.keys(), vec!["c".to_string(), "a".to_string()]);
        assert!(!cache.contains("b"));
    }

    #[tokio::test]
    async fn test_cached_entry_is_not_invalidated() {
        let store = store_with(&["k"]).await;
        let cache = RollupCache::new(store.clone(), 2);
        assert_eq!(cache.get("k").await.unwrap().unwrap().total_cpu_usage, 1.0);

        store
            .set(&rollup_key("k"), serde_json::to_string(&rollup("k", 9.0)).unwrap())
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().unwrap().total_cpu_usage, 1.0);
    }

    #[tokio::test]
    async fn test_corrupt_rollup_is_an_error() {
        let store = Arc::new(MemoryKvStore::new());
        store.set("agg_bad", "{".to_string()).await.unwrap();
        let cache = RollupCache::new(store, 2);
        assert!(matches!(cache.get("bad").await, Err(StorageError::Serialization(_))));
    }
}
