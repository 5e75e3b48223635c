//! Request coalescing for the image-metadata lookup (§4.I, §9 design note):
//! a keyed map of in-flight fetches with a shared result. The first caller
//! for a given identifier does the database work; callers that arrive while
//! it is in flight await the same result instead of issuing their own query.
//! The entry is always removed once the leader finishes — on a transient
//! error that means the very next caller retries immediately rather than
//! waiting out a negative cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, OnceCell};

use crate::error::ImageStoreError;
use crate::images::Image;

const COALESCE_TIMEOUT: Duration = Duration::from_secs(30);

struct Entry {
    result: OnceCell<Result<Image, ImageStoreError>>,
    ready: Notify,
}

pub struct MetadataCoalescer {
    inflight: Mutex<HashMap<String, Arc<Entry>>>,
}

impl MetadataCoalescer {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `fetch` at most once per `key` among concurrent callers. `fetch`
    /// only runs for the caller that installs the entry; everyone else waits
    /// on it, bounded by the same 30s ceiling as the leader's own fetch.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<Image, ImageStoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Image, ImageStoreError>>,
    {
        let (entry, is_leader) = {
            let mut map = self.inflight.lock().await;
            if let Some(existing) = map.get(key) {
                (existing.clone(), false)
            } else {
                let fresh = Arc::new(Entry {
                    result: OnceCell::new(),
                    ready: Notify::new(),
                });
                map.insert(key.to_string(), fresh.clone());
                (fresh, true)
            }
        };

        if is_leader {
            let outcome = match tokio::time::timeout(COALESCE_TIMEOUT, fetch()).await {
                Ok(result) => result,
                Err(_) => Err(ImageStoreError::Database(
                    "timed out waiting for metadata lookup".to_string(),
                )),
            };
            let _ = entry.result.set(outcome.clone());
            entry.ready.notify_waiters();
            self.inflight.lock().await.remove(key);
            outcome
        } else {
            let waited = tokio::time::timeout(COALESCE_TIMEOUT, async {
                loop {
                    if let Some(result) = entry.result.get() {
                        return result.clone();
                    }
                    entry.ready.notified().await;
                }
            })
            .await;
            waited.unwrap_or_else(|_| {
                Err(ImageStoreError::Database(
                    "timed out waiting for coalesced metadata lookup".to_string(),
                ))
            })
        }
    }
}

impl Default for MetadataCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use entity::images::VariantStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn sample_image() -> Image {
        Image {
            id: 1,
            identifier: "abc123".to_string(),
            file_hash: "hash".to_string(),
            original_filename: "a.jpg".to_string(),
            file_size_bytes: 10,
            mime_type: "image/jpeg".to_string(),
            storage_path: "original/2026/01/01/abc123.jpg".to_string(),
            storage_backend_id: 1,
            width: 10,
            height: 10,
            owner_user_id: Uuid::new_v4(),
            is_public: true,
            variant_status: VariantStatus::None,
            pending_deletion: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn concurrent_callers_for_the_same_key_share_one_fetch() {
        let coalescer = Arc::new(MetadataCoalescer::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coalescer = coalescer.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .get_or_fetch("abc123", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(sample_image())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entry_is_evicted_after_completion_so_the_next_call_refetches() {
        let coalescer = MetadataCoalescer::new();
        let calls = AtomicUsize::new(0);

        coalescer
            .get_or_fetch("abc123", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ImageStoreError::Database("connection reset".to_string()))
            })
            .await
            .unwrap_err();

        coalescer
            .get_or_fetch("abc123", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(sample_image())
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
