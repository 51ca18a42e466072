/// Key-value persistence adapters. State containers persist through this
/// seam instead of touching a concrete store directly.
use crate::error::{Result, SparkError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// On-disk store backed by sled
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let db = sled::open(data_dir.join("client.db"))
            .map_err(|e| SparkError::Storage(format!("client DB: {}", e)))?;
        Ok(Self { db })
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .db
            .get(key.as_bytes())
            .map_err(|e| SparkError::Storage(format!("get {}: {}", key, e)))?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db
            .insert(key.as_bytes(), value)
            .map_err(|e| SparkError::Storage(format!("put {}: {}", key, e)))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| SparkError::Storage(format!("remove {}: {}", key, e)))?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SparkError::Storage("memory store poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SparkError::Storage("memory store poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SparkError::Storage("memory store poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::default();
        assert!(store.get("k").unwrap().is_none());
        store.put("k", b"v").unwrap();
        assert_eq!(store.get("k").unwrap().unwrap(), b"v");
        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn test_sled_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        store.put("auth/token", b"tok").unwrap();
        assert_eq!(store.get("auth/token").unwrap().unwrap(), b"tok");
        store.remove("auth/token").unwrap();
        assert!(store.get("auth/token").unwrap().is_none());
    }
}
