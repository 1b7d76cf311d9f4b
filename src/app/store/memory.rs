//! In-memory shared store
//!
//! A process-local implementation of [`SharedStore`] with the same atomicity
//! guarantees as the Redis backend: every operation runs under one async
//! mutex, so compare-and-set and increment are indivisible. Expiry is tracked
//! on the tokio clock, which lets tests advance TTLs with paused time.
//!
//! The store can be switched offline to simulate an unreachable backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::SharedStore;
use crate::errors::{StoreError, StoreResult};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// Process-local store with Redis-equivalent semantics
#[derive(Debug, Default)]
pub struct InMemoryStore {
    slots: Mutex<HashMap<String, Slot>>,
    offline: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend becoming unreachable (or reachable again)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        debug!("In-memory store offline = {}", offline);
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let slots = self.slots.lock().await;
        slots.values().filter(|slot| !slot.is_expired(now)).count()
    }

    /// Whether the store holds no live keys
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining time-to-live of a key, if it exists and expires
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let slots = self.slots.lock().await;
        slots
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn check_online(&self, command: &str) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: format!("in-memory store offline ({})", command),
            });
        }
        Ok(())
    }

    /// Drop the slot for `key` if it has expired
    fn purge_expired(slots: &mut HashMap<String, Slot>, key: &str, now: Instant) {
        if slots.get(key).map(|slot| slot.is_expired(now)).unwrap_or(false) {
            slots.remove(key);
        }
    }

    fn hash_mut<'a>(
        slots: &'a mut HashMap<String, Slot>,
        map: &str,
        operation: &str,
    ) -> StoreResult<&'a mut HashMap<String, String>> {
        let slot = slots.entry(map.to_string()).or_insert_with(|| Slot {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut slot.value {
            Value::Hash(fields) => Ok(fields),
            Value::Str(_) => Err(StoreError::WrongType {
                key: map.to_string(),
                operation: operation.to_string(),
            }),
        }
    }

    fn hash_ref<'a>(
        slots: &'a HashMap<String, Slot>,
        map: &str,
        operation: &str,
    ) -> StoreResult<Option<&'a HashMap<String, String>>> {
        match slots.get(map).map(|slot| &slot.value) {
            Some(Value::Hash(fields)) => Ok(Some(fields)),
            Some(Value::Str(_)) => Err(StoreError::WrongType {
                key: map.to_string(),
                operation: operation.to_string(),
            }),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_online("GET")?;
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        Self::purge_expired(&mut slots, key, now);
        match slots.get(key).map(|slot| &slot.value) {
            Some(Value::Str(value)) => Ok(Some(value.clone())),
            Some(Value::Hash(_)) => Err(StoreError::WrongType {
                key: key.to_string(),
                operation: "GET".to_string(),
            }),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check_online("SET")?;
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        slots.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        self.check_online("SET NX")?;
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        Self::purge_expired(&mut slots, key, now);
        if slots.contains_key(key) {
            return Ok(false);
        }
        slots.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check_online("DEL")?;
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        Self::purge_expired(&mut slots, key, now);
        Ok(slots.remove(key).is_some())
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.check_online("DEL IF EQ")?;
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        Self::purge_expired(&mut slots, key, now);
        let matches = matches!(
            slots.get(key).map(|slot| &slot.value),
            Some(Value::Str(current)) if current == expected
        );
        if matches {
            slots.remove(key);
        }
        Ok(matches)
    }

    async fn expire_if_eq(&self, key: &str, expected: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_online("PEXPIRE IF EQ")?;
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        Self::purge_expired(&mut slots, key, now);
        match slots.get_mut(key) {
            Some(slot) if matches!(&slot.value, Value::Str(current) if current == expected) => {
                slot.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn incr(
        &self,
        key: &str,
        delta: i64,
        ttl_on_create: Option<Duration>,
    ) -> StoreResult<i64> {
        self.check_online("INCR")?;
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        Self::purge_expired(&mut slots, key, now);

        match slots.get_mut(key) {
            Some(slot) => {
                let current = match &slot.value {
                    Value::Str(raw) => raw.parse::<i64>().map_err(|_| StoreError::WrongType {
                        key: key.to_string(),
                        operation: "INCR".to_string(),
                    })?,
                    Value::Hash(_) => {
                        return Err(StoreError::WrongType {
                            key: key.to_string(),
                            operation: "INCR".to_string(),
                        })
                    }
                };
                let next = current + delta;
                slot.value = Value::Str(next.to_string());
                Ok(next)
            }
            None => {
                slots.insert(
                    key.to_string(),
                    Slot {
                        value: Value::Str(delta.to_string()),
                        expires_at: ttl_on_create.map(|ttl| now + ttl),
                    },
                );
                Ok(delta)
            }
        }
    }

    async fn hget(&self, map: &str, field: &str) -> StoreResult<Option<String>> {
        self.check_online("HGET")?;
        let slots = self.slots.lock().await;
        Ok(Self::hash_ref(&slots, map, "HGET")?.and_then(|fields| fields.get(field).cloned()))
    }

    async fn hset(&self, map: &str, field: &str, value: &str) -> StoreResult<()> {
        self.check_online("HSET")?;
        let mut slots = self.slots.lock().await;
        Self::hash_mut(&mut slots, map, "HSET")?.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hset_nx(&self, map: &str, field: &str, value: &str) -> StoreResult<bool> {
        self.check_online("HSETNX")?;
        let mut slots = self.slots.lock().await;
        let fields = Self::hash_mut(&mut slots, map, "HSETNX")?;
        if fields.contains_key(field) {
            return Ok(false);
        }
        fields.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hdel(&self, map: &str, field: &str) -> StoreResult<bool> {
        self.check_online("HDEL")?;
        let mut slots = self.slots.lock().await;
        let removed = match slots.get_mut(map).map(|slot| &mut slot.value) {
            Some(Value::Hash(fields)) => fields.remove(field).is_some(),
            Some(Value::Str(_)) => {
                return Err(StoreError::WrongType {
                    key: map.to_string(),
                    operation: "HDEL".to_string(),
                })
            }
            None => false,
        };
        // Redis removes a hash once its last field is gone
        if matches!(slots.get(map).map(|slot| &slot.value), Some(Value::Hash(f)) if f.is_empty()) {
            slots.remove(map);
        }
        Ok(removed)
    }

    async fn hgetall(&self, map: &str) -> StoreResult<Vec<(String, String)>> {
        self.check_online("HGETALL")?;
        let slots = self.slots.lock().await;
        Ok(Self::hash_ref(&slots, map, "HGETALL")?
            .map(|fields| {
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn hincr(&self, map: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.check_online("HINCRBY")?;
        let mut slots = self.slots.lock().await;
        let fields = Self::hash_mut(&mut slots, map, "HINCRBY")?;
        let current = match fields.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::WrongType {
                key: format!("{}.{}", map, field),
                operation: "HINCRBY".to_string(),
            })?,
            None => 0,
        };
        let next = current + delta;
        fields.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hset_nx_counted(
        &self,
        map: &str,
        field: &str,
        value: &str,
        counters: &str,
    ) -> StoreResult<(bool, i64)> {
        self.check_online("HSETNX COUNTED")?;
        let mut slots = self.slots.lock().await;

        let fields = Self::hash_mut(&mut slots, map, "HSETNX")?;
        let created = !fields.contains_key(field);
        if created {
            fields.insert(field.to_string(), value.to_string());
        }

        let counts = Self::hash_mut(&mut slots, counters, "HINCRBY")?;
        let count = if created {
            1
        } else {
            counts
                .get(field)
                .map(|raw| {
                    raw.parse::<i64>().map_err(|_| StoreError::WrongType {
                        key: format!("{}.{}", counters, field),
                        operation: "HINCRBY".to_string(),
                    })
                })
                .transpose()?
                .unwrap_or(0)
                + 1
        };
        counts.insert(field.to_string(), count.to_string());
        Ok((created, count))
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check_online("SCAN")?;
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        slots.retain(|_, slot| !slot.is_expired(now));
        let mut keys: Vec<String> = slots
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_set_delete() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = InMemoryStore::new();
        store
            .set("short", "lived", Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get("short").await.unwrap(), Some("lived".to_string()));
        assert!(store.ttl("short").await.unwrap() <= Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("short").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_respects_expiry() {
        let store = InMemoryStore::new();
        assert!(store
            .set_nx("claim", "a", Some(Duration::from_secs(5)))
            .await
            .unwrap());
        assert!(!store
            .set_nx("claim", "b", Some(Duration::from_secs(5)))
            .await
            .unwrap());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store
            .set_nx("claim", "b", Some(Duration::from_secs(5)))
            .await
            .unwrap());
        assert_eq!(store.get("claim").await.unwrap(), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_delete_if_eq() {
        let store = InMemoryStore::new();
        store.set("claim", "owner-1", None).await.unwrap();

        assert!(!store.delete_if_eq("claim", "owner-2").await.unwrap());
        assert!(store.get("claim").await.unwrap().is_some());

        assert!(store.delete_if_eq("claim", "owner-1").await.unwrap());
        assert!(store.get("claim").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_if_eq_renews_only_for_owner() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(10);
        store.set("lock", "owner-1", Some(ttl)).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(!store.expire_if_eq("lock", "owner-2", ttl).await.unwrap());
        assert!(store.expire_if_eq("lock", "owner-1", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(store.get("lock").await.unwrap(), Some("owner-1".to_string()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.expire_if_eq("lock", "owner-1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_hset_nx_counted_resets_orphan_counter() {
        let store = InMemoryStore::new();
        // Counter left behind by an entry that was already drained
        store.hset("counts", "fp", "4").await.unwrap();

        assert_eq!(
            store.hset_nx_counted("queue", "fp", "a", "counts").await.unwrap(),
            (true, 1)
        );
        assert_eq!(
            store.hset_nx_counted("queue", "fp", "b", "counts").await.unwrap(),
            (false, 2)
        );
        assert_eq!(store.hget("queue", "fp").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_sets_expiry_on_create_only() {
        let store = InMemoryStore::new();
        let ttl = Some(Duration::from_secs(60));

        assert_eq!(store.incr("window", 1, ttl).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.incr("window", 1, ttl).await.unwrap(), 2);

        // The second increment must not have pushed the expiry out
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.get("window").await.unwrap(), None);
        assert_eq!(store.incr("window", 1, ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_incr_is_atomic_under_concurrency() {
        let store = Arc::new(InMemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..100 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.incr("counter", 1, None).await.unwrap()
            }));
        }

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort();
        assert_eq!(seen, (1..=100).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let store = InMemoryStore::new();
        assert!(store.hset_nx("queue", "a", "1").await.unwrap());
        assert!(!store.hset_nx("queue", "a", "2").await.unwrap());
        assert_eq!(store.hget("queue", "a").await.unwrap(), Some("1".to_string()));

        store.hset("queue", "b", "3").await.unwrap();
        let mut all = store.hgetall("queue").await.unwrap();
        all.sort();
        assert_eq!(
            all,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "3".to_string())
            ]
        );

        assert_eq!(store.hincr("dedup", "a", 1).await.unwrap(), 1);
        assert_eq!(store.hincr("dedup", "a", 2).await.unwrap(), 3);

        assert!(store.hdel("queue", "a").await.unwrap());
        assert!(store.hdel("queue", "b").await.unwrap());
        assert!(store.hgetall("queue").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_errors() {
        let store = InMemoryStore::new();
        store.set("plain", "x", None).await.unwrap();
        assert!(matches!(
            store.hget("plain", "f").await,
            Err(StoreError::WrongType { .. })
        ));
        assert!(matches!(
            store.incr("plain", 1, None).await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let store = InMemoryStore::new();
        store.set("jobs:cache:b", "1", None).await.unwrap();
        store.set("jobs:cache:a", "1", None).await.unwrap();
        store.set("jobs:stats:x", "1", None).await.unwrap();

        let keys = store.scan_prefix("jobs:cache:").await.unwrap();
        assert_eq!(keys, vec!["jobs:cache:a", "jobs:cache:b"]);
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = InMemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.get("k").await,
            Err(StoreError::Unavailable { .. })
        ));
        store.set_offline(false);
        assert!(store.get("k").await.is_ok());
    }
}
