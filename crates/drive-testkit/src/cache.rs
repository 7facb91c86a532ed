//! In-memory entity cache

use async_trait::async_trait;
use drive_core::{CacheError, EntityCache};
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory [`EntityCache`] for tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an entry exists under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Raw entry under `key`.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    /// Overwrite an entry directly, bypassing serialization. Used to plant
    /// corrupt entries.
    pub fn plant(&self, key: &str, value: &str) {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl EntityCache for MemoryCache {
    async fn set_entity(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn get_entity(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn remove_entities(&self, keys: &[String]) -> Result<(), CacheError> {
        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}
