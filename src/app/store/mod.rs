//! Shared key/value store abstraction
//!
//! Every piece of coordination state in the engine (cache entries, in-flight
//! claims, rate-limit windows, the batch queue and stats counters) lives in a
//! store shared by all worker processes. Correctness relies on the store's
//! atomic primitives rather than on any per-process lock:
//!
//! - [`SharedStore::set_nx`] is the compare-and-set used for claims and locks
//! - [`SharedStore::incr`] is the increment-with-expiry used for rate windows
//! - [`SharedStore::hset_nx_counted`] makes queue dedup atomic
//! - [`SharedStore::delete_if_eq`] releases a claim only if we still own it
//! - [`SharedStore::expire_if_eq`] renews a lock only if we still own it
//!
//! Two implementations are provided: [`InMemoryStore`], a process-local fake
//! with identical semantics used by tests and single-process deployments, and
//! `RedisStore` (feature `redis`) for multi-process deployments.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{StoreError, StoreResult};

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Redis-equivalent operations required by the engine
#[async_trait]
pub trait SharedStore: Send + Sync + std::fmt::Debug {
    /// Read a string value
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a value, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Write a value only if the key is absent; returns whether it was written
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool>;

    /// Delete a key; returns whether it existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete a key only if it currently holds `expected`
    async fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Reset the expiry of a key only if it currently holds `expected`
    async fn expire_if_eq(&self, key: &str, expected: &str, ttl: Duration) -> StoreResult<bool>;

    /// Atomically add `delta` to an integer counter
    ///
    /// When the increment creates the key and `ttl_on_create` is set, the
    /// counter expires after that duration. Existing expiries are untouched.
    async fn incr(&self, key: &str, delta: i64, ttl_on_create: Option<Duration>)
        -> StoreResult<i64>;

    /// Read one field of a hash
    async fn hget(&self, map: &str, field: &str) -> StoreResult<Option<String>>;

    /// Write one field of a hash
    async fn hset(&self, map: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Write one field of a hash only if absent; returns whether it was written
    async fn hset_nx(&self, map: &str, field: &str, value: &str) -> StoreResult<bool>;

    /// Delete one field of a hash; returns whether it existed
    async fn hdel(&self, map: &str, field: &str) -> StoreResult<bool>;

    /// Read all fields of a hash
    async fn hgetall(&self, map: &str) -> StoreResult<Vec<(String, String)>>;

    /// Atomically add `delta` to an integer hash field
    async fn hincr(&self, map: &str, field: &str, delta: i64) -> StoreResult<i64>;

    /// Write a hash field if absent and count the write in `counters`
    ///
    /// Creating the field resets its counter to 1; otherwise the counter is
    /// incremented. Both happen in one atomic step. Returns whether the field
    /// was created and the counter afterwards.
    async fn hset_nx_counted(
        &self,
        map: &str,
        field: &str,
        value: &str,
        counters: &str,
    ) -> StoreResult<(bool, i64)>;

    /// List keys starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Shared handle type injected into every component
pub type StoreHandle = Arc<dyn SharedStore>;

/// Serialize a value and write it under `key`
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn SharedStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> StoreResult<()> {
    let payload = serde_json::to_string(value).map_err(|e| StoreError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.set(key, &payload, ttl).await
}

/// Read and deserialize the value under `key`
///
/// A value that fails to deserialize is reported as a serialization error
/// rather than silently treated as missing.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn SharedStore,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = InMemoryStore::new();
        let payload = Payload {
            name: "remotive".to_string(),
            count: 3,
        };

        set_json(&store, "payload", &payload, None).await.unwrap();
        let back: Option<Payload> = get_json(&store, "payload").await.unwrap();
        assert_eq!(back, Some(payload));

        let missing: Option<Payload> = get_json(&store, "missing").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_json_is_an_error() {
        let store = InMemoryStore::new();
        store.set("payload", "{not json", None).await.unwrap();

        let result: StoreResult<Option<Payload>> = get_json(&store, "payload").await;
        assert!(matches!(result, Err(StoreError::Serialization { .. })));
    }
}
