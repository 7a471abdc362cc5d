use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use tracing::info;

/// Derive the cache key for a final query.
///
/// The key is the SHA-256 of the query's bytes: byte-identical queries
/// share an entry, any byte difference (whitespace included) does not.
/// Execution settings and query_id are deliberately not part of the key.
pub fn cache_key(final_query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(final_query.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The shared key-value store holding serialized result sets.
///
/// An opaque external collaborator: persistence, eviction and replication
/// are its own concern. Implementations must provide atomic get/set; the
/// executor never coordinates writes across concurrent misses.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
}

/// Redis-backed store for deployments sharing a cache across processes.
/// Keys are namespaced under a configurable prefix.
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
    prefix: String,
}

impl RedisStore {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .with_context(|| format!("invalid redis url {url}"))?;
        let conn = client
            .get_connection_manager()
            .await
            .with_context(|| format!("failed to connect to redis at {url}"))?;
        info!(target: "cache", url = %url, prefix = %prefix, "Connected to redis result store");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl ResultStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn
            .get(self.namespaced(key))
            .await
            .context("redis GET failed")?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.namespaced(key), value, ttl.as_secs().max(1))
            .await
            .context("redis SETEX failed")?;
        Ok(())
    }
}

/// Honors the per-entry TTL recorded alongside each value.
struct PerEntryTtl;

impl Expiry<String, (Duration, Vec<u8>)> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &(Duration, Vec<u8>),
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.0)
    }
}

/// In-process store for tests and single-node deployments.
pub struct MemoryStore {
    cache: Cache<String, (Duration, Vec<u8>)>,
}

impl MemoryStore {
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.cache.get(key).await.map(|(_, value)| value))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.cache.insert(key.to_string(), (ttl, value)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_deterministic() {
        assert_eq!(cache_key("SELECT 1"), cache_key("SELECT 1"));
        assert_eq!(cache_key("SELECT 1").len(), 64);
    }

    #[test]
    fn test_cache_key_is_byte_sensitive() {
        assert_ne!(cache_key("SELECT 1"), cache_key("SELECT 2"));
        // Whitespace changes the key too.
        assert_ne!(cache_key("SELECT 1"), cache_key("SELECT  1"));
        assert_ne!(cache_key("SELECT 1"), cache_key("SELECT 1 "));
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::default();
        let ttl = Duration::from_secs(60);

        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", b"[1,2]".to_vec(), ttl).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"[1,2]".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_store_expires_entries() {
        let store = MemoryStore::default();
        store
            .set("k", b"[]".to_vec(), Duration::from_millis(300))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }
}
