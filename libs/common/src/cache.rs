//! Expiring key/value cache used for short-lived credentials
//!
//! This module provides the [`CredentialCache`] abstraction together with a
//! Redis backend for production and an in-process backend for tests and
//! single-node setups. Expiry is always enforced by the backend itself;
//! nothing here sweeps entries in the background.

use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

/// Delete KEYS[1] only when its value equals ARGV[1]
const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

use crate::error::CacheResult;

/// Key/value store whose entries disappear after a time-to-live
#[async_trait]
pub trait CredentialCache: Send + Sync {
    /// Store `value` under `key`, replacing any previous entry and its TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Read a value without consuming it. Expired entries read as `None`.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Remove `key` only if it currently holds `expected`, as one atomic step.
    /// Returns `false` when the key is absent, expired or holds another value.
    async fn take_if(&self, key: &str, expected: &str) -> CacheResult<bool>;

    /// Remove a key, succeeding whether or not it existed
    async fn delete(&self, key: &str) -> CacheResult<()>;
}

/// Configuration for Redis connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    pub fn from_env() -> Self {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| Self::default().url);
        RedisConfig { url }
    }
}

/// Redis connection handle
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
}

impl RedisPool {
    /// Initialize a new Redis client
    pub async fn new(config: &RedisConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.clone())?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool { client })
    }

    async fn get_connection(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}

#[async_trait]
impl CredentialCache for RedisPool {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        // PX keeps sub-second TTLs; a zero TTL would be rejected by Redis.
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn take_if(&self, key: &str, expected: &str) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let removed: i64 = redis::Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let _: u64 = conn.del(key).await?;
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// In-process cache with lazy expiry
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, MemoryEntry>>>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, evicting expired ones first
    pub async fn len(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.len()
    }

    /// Whether no live entries remain
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CredentialCache for MemoryCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn take_if(&self, key: &str, expected: &str) -> CacheResult<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let live_match = entries
            .get(key)
            .map(|entry| (entry.expires_at > now, entry.value == expected));

        match live_match {
            Some((true, true)) => {
                entries.remove(key);
                Ok(true)
            }
            Some((false, _)) => {
                entries.remove(key);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
