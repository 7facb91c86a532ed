//! Host-supplied entity and crypto caches
//!
//! Caches are abstract key/value stores passed in by the host. Each write is
//! an atomic entry replacement. Serialization of cached values is the SDK's
//! responsibility; corrupt entries are evicted on detection.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Cache operation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// Failed to read an entry.
    #[error("cache read failed: {0}")]
    ReadFailed(String),
    /// Failed to write an entry.
    #[error("cache write failed: {0}")]
    WriteFailed(String),
    /// Failed to remove entries.
    #[error("cache remove failed: {0}")]
    RemoveFailed(String),
}

/// Abstract key/value store supplied by the host.
///
/// Values are opaque strings; the SDK serializes entries to JSON before
/// storing them.
#[async_trait]
pub trait EntityCache: Send + Sync {
    /// Replace the entry under `key`.
    async fn set_entity(&self, key: &str, value: String) -> Result<(), CacheError>;

    /// Read the entry under `key`.
    async fn get_entity(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Remove the entries under `keys`. Missing keys are not an error.
    async fn remove_entities(&self, keys: &[String]) -> Result<(), CacheError>;
}

/// Store a value serialized as JSON.
pub async fn set_json<T: Serialize + Sync>(
    cache: &dyn EntityCache,
    key: &str,
    value: &T,
) -> Result<(), CacheError> {
    let serialized = serde_json::to_string(value)
        .map_err(|err| CacheError::WriteFailed(format!("serialize {key}: {err}")))?;
    cache.set_entity(key, serialized).await
}

/// Read a JSON value, evicting the entry when it no longer deserializes.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn EntityCache, key: &str) -> Option<T> {
    let raw = match cache.get_entity(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            warn!(key, %err, "cache read failed");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, %err, "evicting corrupt cache entry");
            let _ = cache.remove_entities(&[key.to_string()]).await;
            None
        }
    }
}
