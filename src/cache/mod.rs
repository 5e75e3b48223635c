//! Cache provider abstraction (§4.B): a TTL-bounded key→value store, either
//! in-process or a remote server, behind one small capability trait. Values
//! are serialized on the way in and deserialized on the way out; byte-slice
//! values pass through unchanged. `CacheError::Miss` is a dedicated sentinel
//! so callers can distinguish "absent" from "transport failure".

pub mod memory;
pub mod redis_cache;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::error::CacheError;

pub fn image_key(identifier: &str) -> String {
    format!("image:{identifier}")
}

pub fn image_data_key(identifier: &str) -> String {
    format!("image_data:{identifier}")
}

pub fn empty_key(key: &str) -> String {
    format!("empty:{key}")
}

#[async_trait]
pub trait CacheProvider: Send + Sync {
    async fn set_bytes(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
}

/// Typed convenience wrappers: self-describing JSON encoding on top of
/// `set_bytes`/`get_bytes`, matching the "other values use a stable
/// self-describing encoding" rule. Kept outside the trait so `CacheProvider`
/// stays object-safe (`Arc<dyn CacheProvider>`).
pub async fn set_json<T: Serialize + Sync>(
    cache: &(dyn CacheProvider),
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Encoding(e.to_string()))?;
    cache.set_bytes(key, bytes, ttl).await
}

pub async fn get_json<T: DeserializeOwned>(
    cache: &(dyn CacheProvider),
    key: &str,
) -> Result<T, CacheError> {
    let bytes = cache.get_bytes(key).await?;
    serde_json::from_slice(&bytes).map_err(|e| CacheError::Encoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_match_the_fixed_key_format() {
        assert_eq!(image_key("abc123"), "image:abc123");
        assert_eq!(image_data_key("abc123"), "image_data:abc123");
        assert_eq!(empty_key("missing-id"), "empty:missing-id");
    }
}
