use super::traits::{KeyValueStore, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-process key-value store.
///
/// Nothing expires and nothing survives a restart; suitable for staging
/// within a single process and as a fake in tests.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted snapshot of the stored keys
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Lock)?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Lock)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Lock)?;
        Ok(entries.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryKvStore::new();
        assert!(store.is_empty());

        store.set("batch_1", "payload".to_string()).await.unwrap();
        assert_eq!(store.get("batch_1").await.unwrap().as_deref(), Some("payload"));
        assert_eq!(store.keys(), vec!["batch_1".to_string()]);

        assert!(store.delete("batch_1").await.unwrap());
        assert!(!store.delete("batch_1").await.unwrap());
        assert_eq!(store.get("batch_1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = MemoryKvStore::new();
        store.set("agg_k", "old".to_string()).await.unwrap();
        store.set("agg_k", "new".to_string()).await.unwrap();
        assert_eq!(store.get("agg_k").await.unwrap().as_deref(), Some("new"));
        assert_eq!(store.len(), 1);
    }
}
