//! Redis-backed shared store (feature `redis`)
//!
//! Uses a multiplexed [`ConnectionManager`] so every component can clone the
//! handle cheaply and reconnects happen transparently. Operations that must be
//! atomic beyond a single command (increment with expiry on create,
//! compare-and-delete, compare-and-expire, counted hash insert) run as Lua
//! scripts.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use tracing::{debug, info};

use super::SharedStore;
use crate::errors::{StoreError, StoreResult};

const INCR_WITH_EXPIRY: &str = r#"
local existed = redis.call('EXISTS', KEYS[1])
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
if existed == 0 and tonumber(ARGV[2]) > 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return value
"#;

const DELETE_IF_EQ: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const EXPIRE_IF_EQ: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const HSETNX_COUNTED: &str = r#"
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 1 then
    redis.call('HSET', KEYS[2], ARGV[1], 1)
    return {1, 1}
end
return {0, redis.call('HINCRBY', KEYS[2], ARGV[1], 1)}
"#;

/// Keys fetched per SCAN round trip
const SCAN_BATCH: usize = 200;

/// Shared store backed by a Redis server
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    url: String,
    incr_script: Script,
    delete_script: Script,
    expire_script: Script,
    enqueue_script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("url", &self.url).finish()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `url`
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Unavailable {
            reason: format!("invalid Redis URL {}: {}", url, e),
        })?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| map_error("CONNECT", e))?;

        info!("Connected to shared store at {}", url);
        Ok(Self {
            connection,
            url: url.to_string(),
            incr_script: Script::new(INCR_WITH_EXPIRY),
            delete_script: Script::new(DELETE_IF_EQ),
            expire_script: Script::new(EXPIRE_IF_EQ),
            enqueue_script: Script::new(HSETNX_COUNTED),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

fn map_error(command: &str, error: RedisError) -> StoreError {
    if error.is_io_error() || error.is_connection_refusal() || error.is_timeout() {
        StoreError::Unavailable {
            reason: format!("{}: {}", command, error),
        }
    } else if error.kind() == redis::ErrorKind::TypeError {
        StoreError::WrongType {
            key: String::new(),
            operation: command.to_string(),
        }
    } else {
        StoreError::Command {
            command: command.to_string(),
            reason: error.to_string(),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Escape glob metacharacters so a prefix matches literally in SCAN MATCH
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut self.conn())
            .await
            .map_err(|e| map_error("GET", e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        cmd.query_async::<_, ()>(&mut self.conn())
            .await
            .map_err(|e| map_error("SET", e))
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Option<String> = cmd
            .query_async(&mut self.conn())
            .await
            .map_err(|e| map_error("SET NX", e))?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| map_error("DEL", e))?;
        Ok(removed > 0)
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let removed: i64 = self
            .delete_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut self.conn())
            .await
            .map_err(|e| map_error("DEL IF EQ", e))?;
        Ok(removed > 0)
    }

    async fn expire_if_eq(&self, key: &str, expected: &str, ttl: Duration) -> StoreResult<bool> {
        let renewed: i64 = self
            .expire_script
            .key(key)
            .arg(expected)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut self.conn())
            .await
            .map_err(|e| map_error("PEXPIRE IF EQ", e))?;
        Ok(renewed > 0)
    }

    async fn incr(
        &self,
        key: &str,
        delta: i64,
        ttl_on_create: Option<Duration>,
    ) -> StoreResult<i64> {
        let ttl_ms = ttl_on_create.map(ttl_millis).unwrap_or(0);
        self.incr_script
            .key(key)
            .arg(delta)
            .arg(ttl_ms)
            .invoke_async(&mut self.conn())
            .await
            .map_err(|e| map_error("INCRBY", e))
    }

    async fn hget(&self, map: &str, field: &str) -> StoreResult<Option<String>> {
        redis::cmd("HGET")
            .arg(map)
            .arg(field)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| map_error("HGET", e))
    }

    async fn hset(&self, map: &str, field: &str, value: &str) -> StoreResult<()> {
        redis::cmd("HSET")
            .arg(map)
            .arg(field)
            .arg(value)
            .query_async::<_, i64>(&mut self.conn())
            .await
            .map(|_| ())
            .map_err(|e| map_error("HSET", e))
    }

    async fn hset_nx(&self, map: &str, field: &str, value: &str) -> StoreResult<bool> {
        let created: i64 = redis::cmd("HSETNX")
            .arg(map)
            .arg(field)
            .arg(value)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| map_error("HSETNX", e))?;
        Ok(created == 1)
    }

    async fn hdel(&self, map: &str, field: &str) -> StoreResult<bool> {
        let removed: i64 = redis::cmd("HDEL")
            .arg(map)
            .arg(field)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| map_error("HDEL", e))?;
        Ok(removed > 0)
    }

    async fn hgetall(&self, map: &str) -> StoreResult<Vec<(String, String)>> {
        redis::cmd("HGETALL")
            .arg(map)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| map_error("HGETALL", e))
    }

    async fn hincr(&self, map: &str, field: &str, delta: i64) -> StoreResult<i64> {
        redis::cmd("HINCRBY")
            .arg(map)
            .arg(field)
            .arg(delta)
            .query_async(&mut self.conn())
            .await
            .map_err(|e| map_error("HINCRBY", e))
    }

    async fn hset_nx_counted(
        &self,
        map: &str,
        field: &str,
        value: &str,
        counters: &str,
    ) -> StoreResult<(bool, i64)> {
        let reply: Vec<i64> = self
            .enqueue_script
            .key(map)
            .key(counters)
            .arg(field)
            .arg(value)
            .invoke_async(&mut self.conn())
            .await
            .map_err(|e| map_error("HSETNX COUNTED", e))?;
        match reply.as_slice() {
            [created, count] => Ok((*created == 1, *count)),
            _ => Err(StoreError::Command {
                command: "HSETNX COUNTED".to_string(),
                reason: format!("unexpected reply {:?}", reply),
            }),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let pattern = glob_escape(prefix);
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_error("SCAN", e))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        debug!("SCAN {} matched {} keys", pattern, keys.len());
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_escape() {
        assert_eq!(glob_escape("jobs:cache:"), "jobs:cache:*");
        assert_eq!(glob_escape("odd[1]*"), "odd\\[1\\]\\**");
    }

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }
}
