//! Key/value storage collaborator
//!
//! This module handles:
//! - The `KeyValueStore` capability the local history store writes through
//! - An in-memory implementation with an optional byte quota
//! - A file backed implementation that persists the whole map as JSON
//! - Typed get/set helpers for JSON encoded values

pub mod file;

pub use file::FileKeyValueStore;

use crate::error::{HistoryError, Result};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Synchronous string store with a capacity limit.
///
/// `set` fails with [`HistoryError::StorageFull`] when the value does not fit.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// JSON helpers available on every store
pub trait KeyValueStoreExt: KeyValueStore {
    /// Decode the JSON value under `key`, or `default` when absent or malformed
    fn get_object<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key)? {
            None => Ok(default),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(value),
                Err(e) => {
                    warn!(key, error = %e, "ignoring malformed stored value");
                    Ok(default)
                }
            },
        }
    }

    /// Encode `value` as JSON under `key`
    fn set_object<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }

    /// Read a boolean stored as `"true"`/`"false"`
    fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(match self.get(key)?.as_deref() {
            Some("true") => true,
            Some("false") => false,
            _ => default,
        })
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}

/// Bytes a map occupies against a quota
pub(crate) fn footprint(entries: &HashMap<String, String>) -> u64 {
    entries
        .iter()
        .map(|(k, v)| (k.len() + v.len()) as u64)
        .sum()
}

/// Check whether replacing `key` with `value` stays within `quota`
pub(crate) fn fits_quota(
    entries: &HashMap<String, String>,
    quota: Option<u64>,
    key: &str,
    value: &str,
) -> bool {
    let Some(quota) = quota else {
        return true;
    };
    let existing = entries
        .get(key)
        .map(|v| (key.len() + v.len()) as u64)
        .unwrap_or(0);
    let after = footprint(entries) - existing + (key.len() + value.len()) as u64;
    after <= quota
}

/// In-memory store, mainly for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
    quota_bytes: Option<u64>,
}

impl MemoryKeyValueStore {
    /// Create an unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes beyond `quota_bytes` (keys + values)
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Current size in bytes
    pub fn used_bytes(&self) -> u64 {
        footprint(&self.entries.read())
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if !fits_quota(&entries, self.quota_bytes, key, value) {
            warn!(key, size = value.len(), "key/value quota exceeded");
            return Err(HistoryError::storage_full(format!(
                "writing {} bytes to '{}' exceeds the storage quota",
                value.len(),
                key
            )));
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_get_set_delete() {
        let store = MemoryKeyValueStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));

        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        // Deleting a missing key is not an error
        store.delete("a").unwrap();
    }

    #[test]
    fn test_memory_store_quota() {
        let store = MemoryKeyValueStore::with_quota(10);
        store.set("k", "123456789").unwrap();
        assert_eq!(store.used_bytes(), 10);

        let err = store.set("k2", "x").unwrap_err();
        assert_eq!(err.name(), "StorageFull");
        assert_eq!(store.get("k2").unwrap(), None);

        // Replacing a value is measured against the replaced size
        store.set("k", "12345678").unwrap();
        assert_eq!(store.used_bytes(), 9);
    }

    #[test]
    fn test_object_helpers() {
        let store = MemoryKeyValueStore::new();
        assert_eq!(store.get_object("n", 7u32).unwrap(), 7);

        store.set_object("n", &14u32).unwrap();
        assert_eq!(store.get_object("n", 7u32).unwrap(), 14);

        store.set("n", "not json").unwrap();
        assert_eq!(store.get_object("n", 7u32).unwrap(), 7);

        assert!(!store.get_bool("b", false).unwrap());
        store.set_object("b", &true).unwrap();
        assert!(store.get_bool("b", false).unwrap());
    }

    #[test]
    fn test_ext_on_trait_object() {
        let store: std::sync::Arc<dyn KeyValueStore> = std::sync::Arc::new(MemoryKeyValueStore::new());
        store.set_object("list", &vec!["a", "b"]).unwrap();
        let list: Vec<String> = store.get_object("list", Vec::new()).unwrap();
        assert_eq!(list, vec!["a".to_string(), "b".to_string()]);
    }
}
