//! File backed key/value store
//!
//! The whole map lives in one JSON document that is loaded on open and
//! rewritten on every mutation.

use super::{fits_quota, KeyValueStore};
use crate::error::{HistoryError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Key/value store persisted as a single JSON object on disk
#[derive(Debug)]
pub struct FileKeyValueStore {
    storage_path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
    quota_bytes: Option<u64>,
}

impl FileKeyValueStore {
    /// Open (or lazily create) the store at `storage_path`
    pub fn open<P: AsRef<Path>>(storage_path: P) -> Result<Self> {
        Self::open_with_quota(storage_path, None)
    }

    /// Open the store, rejecting writes that would exceed `quota_bytes`
    pub fn open_with_quota<P: AsRef<Path>>(storage_path: P, quota_bytes: Option<u64>) -> Result<Self> {
        let storage_path = storage_path.as_ref().to_path_buf();
        let entries = Self::load_entries(&storage_path)?;
        debug!(path = %storage_path.display(), keys = entries.len(), "opened key/value file");

        Ok(Self {
            storage_path,
            entries: RwLock::new(entries),
            quota_bytes,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    fn load_entries(path: &Path) -> Result<HashMap<String, String>> {
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            HistoryError::Configuration(format!(
                "Failed to parse key/value file {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn save_entries(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.storage_path, content)?;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if !fits_quota(&entries, self.quota_bytes, key, value) {
            warn!(key, size = value.len(), "key/value file quota exceeded");
            return Err(HistoryError::storage_full(format!(
                "writing {} bytes to '{}' exceeds the storage quota",
                value.len(),
                key
            )));
        }

        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.save_entries(&entries) {
            // Keep memory consistent with disk
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(old) = entries.remove(key) {
            if let Err(e) = self.save_entries(&entries) {
                entries.insert(key.to_string(), old);
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_store_persistence() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("data").join("kv.json");

        {
            let store = FileKeyValueStore::open(&path).unwrap();
            store.set("a", "1").unwrap();
            store.set("b", "2").unwrap();
            store.delete("b").unwrap();
        }

        assert!(path.exists());
        let reopened = FileKeyValueStore::open(&path).unwrap();
        assert_eq!(reopened.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(reopened.get("b").unwrap(), None);
    }

    #[test]
    fn test_file_store_quota_leaves_disk_untouched() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("kv.json");

        let store = FileKeyValueStore::open_with_quota(&path, Some(8)).unwrap();
        store.set("a", "1234").unwrap();

        let err = store.set("b", "123456").unwrap_err();
        assert!(matches!(err, HistoryError::StorageFull(_)));

        let reopened = FileKeyValueStore::open(&path).unwrap();
        assert_eq!(reopened.get("b").unwrap(), None);
        assert_eq!(reopened.get("a").unwrap().as_deref(), Some("1234"));
    }

    #[test]
    fn test_empty_and_corrupt_files() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("kv.json");

        std::fs::write(&path, "   ").unwrap();
        let store = FileKeyValueStore::open(&path).unwrap();
        assert_eq!(store.get("a").unwrap(), None);

        std::fs::write(&path, "{ not json").unwrap();
        let err = FileKeyValueStore::open(&path).unwrap_err();
        assert_eq!(err.name(), "Configuration");
    }
}
