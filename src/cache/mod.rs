//! Generic cache layer
//!
//! A thin, optionally namespaced view over the cache operations of a
//! [`Storage`]. The layer enforces whatever TTL it is given; the policy
//! belongs to callers, with [`CacheTtl`] holding the common choices.
//!
//! Reads never fail: a backend error on a cache read is logged and treated
//! as a miss, since cached data can always be recomputed.

use crate::core::error::{Result, VodError};
use crate::db::repository::Storage;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Common cache lifetimes in seconds
pub struct CacheTtl;

impl CacheTtl {
    /// Transient lookups such as episode counts
    pub const SHORT: u64 = 30 * 60;
    /// Slow-changing third-party metadata
    pub const METADATA: u64 = 4 * 60 * 60;
    /// Remembered upstream failures, so a broken upstream is not hammered
    pub const FAILED_LOOKUP: u64 = 60 * 60;
    /// Computed statistics summaries
    pub const STATS: u64 = 30 * 60;
}

/// Namespaced cache over a storage adapter
#[derive(Clone)]
pub struct CacheLayer {
    storage: Arc<dyn Storage>,
    namespace: Option<String>,
}

impl CacheLayer {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage, namespace: None }
    }

    /// Prefix every key with `{namespace}:`
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn full_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, key),
            None => key.to_string(),
        }
    }

    /// Cached value, or `None` on a miss or a failed read
    ///
    /// A cached JSON `null` is returned as `Some(Value::Null)`; it marks a
    /// remembered failed lookup.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let full_key = self.full_key(key);
        match self.storage.get_cache(&full_key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Cached value decoded as `T`; a value of a different shape is a miss
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                debug!(key, error = %e, "Cached value has an unexpected shape");
                None
            }
        }
    }

    /// Store a value; `None` TTL keeps it until deleted
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: Option<u64>) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| VodError::SerializationError(e.to_string()))?;
        self.storage.set_cache(&self.full_key(key), &value, ttl_secs).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.storage.delete_cache(&self.full_key(key)).await
    }

    /// Bulk-invalidate entries under this namespace whose key starts with `prefix`
    pub async fn clear_expired(&self, prefix: Option<&str>) -> Result<u64> {
        match (&self.namespace, prefix) {
            (Some(_), prefix) => {
                let scoped = self.full_key(prefix.unwrap_or(""));
                self.storage.clear_expired_cache(Some(&scoped)).await
            }
            (None, prefix) => self.storage.clear_expired_cache(prefix).await,
        }
    }

    /// Return the cached value, or compute, cache and return it
    ///
    /// `compute` returning `Ok(None)` is remembered as a failed lookup for
    /// [`CacheTtl::FAILED_LOOKUP`] seconds; later calls inside that window
    /// return `None` without calling `compute`. Failing to write the cache
    /// does not fail the call.
    pub async fn read_through<T, F, Fut>(&self, key: &str, ttl_secs: u64, compute: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        match self.get(key).await {
            Some(Value::Null) => {
                debug!(key, "Remembered failed lookup");
                return Ok(None);
            }
            Some(value) => match serde_json::from_value(value) {
                Ok(hit) => return Ok(Some(hit)),
                Err(e) => debug!(key, error = %e, "Cached value has an unexpected shape, recomputing"),
            },
            None => {}
        }

        let computed = compute().await?;
        let stored = match &computed {
            Some(value) => self.set(key, value, Some(ttl_secs)).await,
            None => self.set(key, &Value::Null, Some(CacheTtl::FAILED_LOOKUP)).await,
        };
        if let Err(e) = stored {
            warn!(key, error = %e, "Failed to populate cache");
        }

        Ok(computed)
    }

    /// Compute a fresh value, falling back to the cached one when computing fails
    ///
    /// A successful result refreshes the cache. When `compute` errors or
    /// yields nothing and a cached value exists, the cached value is returned.
    pub async fn refresh_or_stale<T, F, Fut>(&self, key: &str, ttl_secs: u64, compute: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let failure = match compute().await {
            Ok(Some(fresh)) => {
                if let Err(e) = self.set(key, &fresh, Some(ttl_secs)).await {
                    warn!(key, error = %e, "Failed to refresh cache");
                }
                return Ok(Some(fresh));
            }
            Ok(None) => None,
            Err(e) => Some(e),
        };

        match self.get_json::<T>(key).await {
            Some(stale) => {
                debug!(key, "Serving cached value after failed refresh");
                Ok(Some(stale))
            }
            None => match failure {
                Some(e) => Err(e),
                None => Ok(None),
            },
        }
    }
}
