// Storage abstraction for local state persistence

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),
}

/// Namespaced blob storage for flushed state maps
pub trait StateBackend: Send + Sync {
    fn put(&self, namespace: &str, value: &[u8]) -> Result<(), StoreError>;
    fn get(&self, namespace: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn flush(&self) -> Result<(), StoreError>;
}

/// In-memory storage for tests and ephemeral runs
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBackend for MemoryStorage {
    fn put(&self, namespace: &str, value: &[u8]) -> Result<(), StoreError> {
        self.data.write().insert(namespace.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, namespace: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.read().get(namespace).cloned())
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(Self { db })
    }
}

impl StateBackend for SledStorage {
    fn put(&self, namespace: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db
            .insert(namespace.as_bytes(), value)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(())
    }

    fn get(&self, namespace: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .db
            .get(namespace.as_bytes())
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_put_get() {
        let storage = MemoryStorage::new();
        assert!(storage.get("user_ids").unwrap().is_none());
        storage.put("user_ids", b"abc").unwrap();
        assert_eq!(storage.get("user_ids").unwrap(), Some(b"abc".to_vec()));
    }

    #[test]
    fn test_sled_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");
        let path = path.to_str().unwrap();

        {
            let storage = SledStorage::open(path).unwrap();
            storage.put("user_ids", b"persisted").unwrap();
            storage.flush().unwrap();
        }

        let storage = SledStorage::open(path).unwrap();
        assert_eq!(storage.get("user_ids").unwrap(), Some(b"persisted".to_vec()));
    }
}
