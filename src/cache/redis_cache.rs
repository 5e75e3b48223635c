//! Remote cache backend over Redis, grounded on the deadpool-redis pool +
//! `AsyncCommands` usage in the token blacklist adapter: a pooled connection,
//! `SET ... EX ttl` for writes, `GET`/`EXISTS`/`DEL` for reads, errors mapped
//! to `CacheError::Transient` since a Redis outage should never be fatal to a
//! read path that can fall back to the database.

use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Pool};
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheError;

use super::CacheProvider;

#[derive(Clone)]
pub struct RedisCache {
    pool: Arc<Pool>,
}

impl RedisCache {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Transient(format!("pool error: {e}")))
    }
}

#[async_trait]
impl CacheProvider for RedisCache {
    async fn set_bytes(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.get_conn().await?;
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .map_err(|e| CacheError::Transient(e.to_string()))
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let mut conn = self.get_conn().await?;
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| CacheError::Transient(e.to_string()))?;
        value.ok_or(CacheError::Miss)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.get_conn().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| CacheError::Transient(e.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.get_conn().await?;
        conn.exists(key)
            .await
            .map_err(|e| CacheError::Transient(e.to_string()))
    }
}
