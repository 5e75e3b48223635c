//! Upload service (§4.H): content hashing, dedup lookup, soft-delete
//! restore, metadata insert, and fire-and-forget pipeline dispatch.
//!
//! `upload_single`/`upload_batch` take the body already read into memory by
//! the HTTP shell (see `crate::storage::StorageProvider::put`, which itself
//! takes `Vec<u8>` rather than a stream) so there is no streaming-hash
//! variant here; see `DESIGN.md` for why that diverges slightly from the
//! "tee to a temp file while hashing" framing.

mod sniff;

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::cache::{self, CacheProvider};
use crate::config::Config;
use crate::error::UploadError;
use crate::images::{Image, ImageStore, NewImage, RestoreImage};
use crate::pipeline::{PipelineContext, PipelineTask};
use crate::storage::{path as storage_path, StorageProvider};
use crate::variants::{thumbnail_format, VariantStore};
use crate::worker_pool::{CancelToken, WorkerPool};

pub use sniff::sniff_mime;

pub struct UploadResult {
    pub identifier: String,
    pub is_duplicate: bool,
}

pub struct BatchUploadItem {
    pub original_filename: String,
    pub data: Vec<u8>,
}

pub struct BatchUploadResult {
    pub original_filename: String,
    pub result: Result<UploadResult, UploadError>,
}

pub struct UploadService {
    storage: Arc<dyn StorageProvider>,
    images: Arc<dyn ImageStore>,
    variants: Arc<dyn VariantStore>,
    cache: Arc<dyn CacheProvider>,
    config: Arc<Config>,
    pool: Arc<WorkerPool>,
    pipeline_ctx: PipelineContext,
}

impl UploadService {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        images: Arc<dyn ImageStore>,
        variants: Arc<dyn VariantStore>,
        cache: Arc<dyn CacheProvider>,
        config: Arc<Config>,
        pool: Arc<WorkerPool>,
        pipeline_ctx: PipelineContext,
    ) -> Self {
        Self {
            storage,
            images,
            variants,
            cache,
            config,
            pool,
            pipeline_ctx,
        }
    }

    pub async fn upload_single(
        &self,
        data: Vec<u8>,
        original_filename: &str,
        owner_user_id: Uuid,
        is_public: bool,
    ) -> Result<UploadResult, UploadError> {
        let max_bytes = self.config.upload_max_size_mb * 1024 * 1024;
        if data.len() as u64 > max_bytes {
            return Err(UploadError::TooLarge);
        }

        let mime = sniff_mime(&data).ok_or(UploadError::UnsupportedMime)?;
        let file_hash = sha256_hex(&data);

        if let Some(existing) = self
            .images
            .find_live_by_hash(&file_hash)
            .await
            .map_err(|e| UploadError::Database(e.to_string()))?
        {
            self.warm_cache(&existing).await;
            self.dispatch(&existing).await;
            return Ok(UploadResult {
                identifier: existing.identifier,
                is_duplicate: true,
            });
        }

        if let Some(deleted) = self
            .images
            .find_deleted_by_hash(&file_hash)
            .await
            .map_err(|e| UploadError::Database(e.to_string()))?
        {
            let restored = self
                .images
                .restore(
                    deleted.id,
                    RestoreImage {
                        owner_user_id,
                        original_filename: original_filename.to_string(),
                        is_public,
                    },
                )
                .await
                .map_err(|e| UploadError::Database(e.to_string()))?;
            self.warm_cache(&restored).await;
            self.dispatch(&restored).await;
            return Ok(UploadResult {
                identifier: restored.identifier,
                is_duplicate: true,
            });
        }

        let identifier = file_hash[..12].to_string();
        let (width, height) = sniff::dimensions(&data).unwrap_or((0, 0));
        let path = storage_path::original_path(&identifier, mime, Utc::now());

        self.storage.put(&path, data.clone()).await?;

        let new_image = NewImage {
            identifier: identifier.clone(),
            file_hash,
            original_filename: original_filename.to_string(),
            file_size_bytes: data.len() as i64,
            mime_type: mime.to_string(),
            storage_path: path.clone(),
            storage_backend_id: self.storage.backend_id(),
            width,
            height,
            owner_user_id,
            is_public,
        };

        let inserted = match self.images.insert(new_image).await {
            Ok(img) => img,
            Err(e) => {
                if let Err(del_err) = self.storage.delete(&path).await {
                    warn!(path = %path, error = %del_err, "failed to compensate storage write after db insert failure");
                }
                return Err(UploadError::Database(e.to_string()));
            }
        };

        self.warm_cache(&inserted).await;
        self.dispatch(&inserted).await;

        Ok(UploadResult {
            identifier: inserted.identifier,
            is_duplicate: false,
        })
    }

    /// Concurrent, per-item error isolation: one failing file never cancels
    /// the rest of the batch.
    pub async fn upload_batch(
        &self,
        items: Vec<BatchUploadItem>,
        owner_user_id: Uuid,
        is_public: bool,
    ) -> Vec<BatchUploadResult> {
        let futures = items.into_iter().map(|item| async move {
            let result = self
                .upload_single(item.data, &item.original_filename, owner_user_id, is_public)
                .await;
            BatchUploadResult {
                original_filename: item.original_filename,
                result,
            }
        });
        futures::future::join_all(futures).await
    }

    async fn warm_cache(&self, image: &Image) {
        if let Err(e) = cache::set_json(
            self.cache.as_ref(),
            &cache::image_key(&image.identifier),
            image,
            self.config.image_cache_ttl,
        )
        .await
        {
            warn!(identifier = %image.identifier, error = %e, "failed to warm image cache");
        }
    }

    /// Always idempotent: `upsertPending` returns the existing row untouched
    /// if one is already in flight or done, so calling this twice for the
    /// same image never double-enqueues work.
    async fn dispatch(&self, image: &Image) {
        let skip_threshold_bytes = self.config.skip_smaller_than_kb * 1024;
        let is_already_compressed = image.mime_type == "image/gif" || image.mime_type == "image/webp";
        let skip_webp = is_already_compressed && (image.file_size_bytes as u64) < skip_threshold_bytes;

        let want_webp = self.config.webp_enabled && !skip_webp;
        let want_thumbnail = self.config.thumbnail_enabled;
        if !want_webp && !want_thumbnail {
            return;
        }

        let webp_id = if want_webp {
            self.upsert_if_pending(image.id, "webp").await
        } else {
            None
        };

        let thumb_format = thumbnail_format(self.config.thumbnail_sizes.first().copied().unwrap_or(600));
        let thumbnail_id = if want_thumbnail {
            self.upsert_if_pending(image.id, &thumb_format).await
        } else {
            None
        };

        if webp_id.is_none() && thumbnail_id.is_none() {
            return;
        }

        let task = PipelineTask {
            image_id: image.id,
            identifier: image.identifier.clone(),
            source_path: image.storage_path.clone(),
            webp_variant_id: webp_id,
            thumbnail_variant_id: thumbnail_id,
        };
        let ctx = self.pipeline_ctx.clone();
        let cancel = CancelToken::new();
        if !self.pool.submit(async move { task.run(ctx, cancel).await }) {
            warn!(image_id = image.id, "worker pool queue full, pipeline dispatch dropped");
        }
    }

    /// `upsertPending` then the submission precondition: only Pending rows
    /// under the retry cap are handed to the pipeline.
    async fn upsert_if_pending(&self, image_id: i64, format: &str) -> Option<i64> {
        match self.variants.upsert_pending(image_id, format).await {
            Ok(variant) => {
                let under_cap = (variant.retry_count as u32) < self.config.max_retries;
                let pending = variant.status == entity::image_variants::Status::Pending;
                (pending && under_cap).then_some(variant.id)
            }
            Err(e) => {
                warn!(image_id, format, error = %e, "upsert_pending failed");
                None
            }
        }
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_deterministic_and_64_chars() {
        let a = sha256_hex(b"hello world");
        let b = sha256_hex(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn sha256_hex_differs_for_different_inputs() {
        assert_ne!(sha256_hex(b"one"), sha256_hex(b"two"));
    }
}
