//! In-process cache backend, grounded on the `moka` dependency used by other
//! image-serving crates in this ecosystem for exactly this role. `moka`'s
//! entries carry a single pool-wide eviction policy, so per-key TTLs (the
//! core needs three: 1h for metadata, 5m for negative markers, a configurable
//! TTL for raw bytes) are tracked alongside the value and checked on read.

use async_trait::async_trait;
use moka::future::Cache;
use std::time::{Duration, Instant};

use crate::error::CacheError;

use super::CacheProvider;

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

pub struct MemoryCache {
    inner: Cache<String, Entry>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder().max_capacity(max_capacity).build(),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheProvider for MemoryCache {
    async fn set_bytes(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.inner
            .insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        match self.inner.get(key).await {
            Some(entry) if entry.expires_at > Instant::now() => Ok(entry.value),
            Some(_) => {
                self.inner.invalidate(key).await;
                Err(CacheError::Miss)
            }
            None => Err(CacheError::Miss),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.invalidate(key).await;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        match self.get_bytes(key).await {
            Ok(_) => Ok(true),
            Err(CacheError::Miss) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips_bytes() {
        let cache = MemoryCache::default();
        cache
            .set_bytes("image:abc", b"hello".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let got = cache.get_bytes("image:abc").await.unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn miss_is_distinct_from_transport_failure() {
        let cache = MemoryCache::default();
        let err = cache.get_bytes("image:missing").await.unwrap_err();
        assert!(matches!(err, CacheError::Miss));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_miss() {
        let cache = MemoryCache::default();
        cache
            .set_bytes("image:abc", b"hello".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = cache.get_bytes("image:abc").await.unwrap_err();
        assert!(matches!(err, CacheError::Miss));
    }

    #[tokio::test]
    async fn delete_removes_the_entry() {
        let cache = MemoryCache::default();
        cache
            .set_bytes("image:abc", b"hello".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        cache.delete("image:abc").await.unwrap();
        assert!(!cache.exists("image:abc").await.unwrap());
    }
}
