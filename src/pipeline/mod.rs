//! The pipeline task (§4.F): the hardest component. Turns one uploaded
//! source image into its WebP and/or thumbnail variants, advancing the
//! variant state machine under compare-and-swap and leaving a failed variant
//! armed for retry rather than blocking anything else.
//!
//! Decode and encode are CPU-bound and run on `spawn_blocking`, mirroring how
//! the standalone image-processing function offloads `validate_and_decode`/
//! `process_dynamic_image` off the async runtime.

mod codec;

use chrono::Utc;
use entity::image_variants::Status;
use entity::images::VariantStatus;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, warn};

use crate::cache::{self, CacheProvider};
use crate::config::Config;
use crate::error::{Classification, PipelineError};
use crate::images::ImageStore;
use crate::storage::{path as storage_path, StorageProvider};
use crate::variants::VariantStore;
use crate::worker_pool::{CancelToken, DecodeSemaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VariantKind {
    Webp,
    Thumbnail,
}

/// Shared, cloneable handles every pipeline task needs. Built once at
/// startup and handed to the upload service, the scanner, and here.
#[derive(Clone)]
pub struct PipelineContext {
    pub storage: Arc<dyn StorageProvider>,
    pub variants: Arc<dyn VariantStore>,
    pub images: Arc<dyn ImageStore>,
    pub cache: Arc<dyn CacheProvider>,
    pub config: Arc<Config>,
    pub semaphore: Arc<DecodeSemaphore>,
}

/// One run of the pipeline for one image. At least one of the two variant
/// ids must be set.
pub struct PipelineTask {
    pub image_id: i64,
    pub identifier: String,
    pub source_path: String,
    pub webp_variant_id: Option<i64>,
    pub thumbnail_variant_id: Option<i64>,
}

impl PipelineTask {
    /// Consumes the task and drives it to completion. Never returns an
    /// error: every failure path ends in a `markFailed` call on the rows it
    /// owns, so there is nothing left for the caller to propagate.
    pub async fn run(self, ctx: PipelineContext, cancel: CancelToken) {
        let acquired = self.acquire(&ctx).await;
        if acquired.is_empty() {
            return;
        }

        let image_id = self.image_id;
        let identifier = self.identifier.clone();
        let guarded = AssertUnwindSafe(self.execute(&ctx, &cancel, acquired.clone())).catch_unwind();
        if let Err(panic) = guarded.await {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(image_id, identifier = %identifier, panic = %message, "pipeline task panicked");
            for (id, _) in &acquired {
                if let Err(e) = ctx
                    .variants
                    .mark_failed(*id, &format!("panic: {message}"), true, ctx.config.backoff_base)
                    .await
                {
                    warn!(variant_id = id, error = %e, "failed to record panic recovery");
                }
            }
            let _ = ctx.cache.delete(&cache::image_key(&identifier)).await;
        }
    }

    /// Step 1: CAS each requested variant from Pending to Processing. Rows
    /// that lose the race (already claimed, or not Pending) are skipped.
    async fn acquire(&self, ctx: &PipelineContext) -> Vec<(i64, VariantKind)> {
        let mut acquired = Vec::new();
        if let Some(id) = self.webp_variant_id {
            match ctx.variants.cas_status(id, Status::Pending, Status::Processing).await {
                Ok(true) => acquired.push((id, VariantKind::Webp)),
                Ok(false) => {}
                Err(e) => warn!(variant_id = id, error = %e, "cas acquire failed"),
            }
        }
        if let Some(id) = self.thumbnail_variant_id {
            match ctx.variants.cas_status(id, Status::Pending, Status::Processing).await {
                Ok(true) => acquired.push((id, VariantKind::Thumbnail)),
                Ok(false) => {}
                Err(e) => warn!(variant_id = id, error = %e, "cas acquire failed"),
            }
        }
        acquired
    }

    /// Steps 2-7. `acquired` never empty; panics from here are caught by the
    /// caller's `catch_unwind` (step 8).
    async fn execute(self, ctx: &PipelineContext, cancel: &CancelToken, acquired: Vec<(i64, VariantKind)>) {
        let want_webp = acquired.iter().any(|(_, k)| *k == VariantKind::Webp);
        let want_thumbnail = acquired.iter().any(|(_, k)| *k == VariantKind::Thumbnail);

        if let Some(err) = validate_encoder_config(&ctx.config) {
            self.fail_all(ctx, &acquired, &err, false).await;
            self.invalidate_cache(ctx).await;
            return;
        }

        // Step 2: bound memory.
        let permit = match ctx.semaphore.acquire(cancel).await {
            Some(p) => p,
            None => {
                self.fail_all(ctx, &acquired, "transient: cancelled waiting for decode permit", true)
                    .await;
                self.invalidate_cache(ctx).await;
                return;
            }
        };

        // Step 3: fetch, with a byte ceiling one above the configured max.
        let max_bytes = ctx.config.upload_max_size_mb * 1024 * 1024 + 1;
        let bytes = match ctx.storage.get_bytes(&self.source_path, max_bytes).await {
            Ok(b) => b,
            Err(e) => {
                drop(permit);
                let message = e.to_string();
                let pipeline_err = PipelineError::from_message(message);
                let allow_retry = pipeline_err.classification() == Classification::Transient;
                self.fail_all(ctx, &acquired, &pipeline_err.to_string(), allow_retry).await;
                self.invalidate_cache(ctx).await;
                return;
            }
        };

        let max_dimension = ctx.config.max_dimension;
        let webp_quality = ctx.config.webp_quality;
        let webp_effort = ctx.config.webp_effort;
        let thumbnail_width = ctx.config.thumbnail_sizes.first().copied().unwrap_or(600);
        let thumbnail_quality = ctx.config.thumbnail_quality;

        // Steps 4-5: decode once, produce whichever stages were requested.
        let produced = tokio::task::spawn_blocking(move || {
            codec::decode_and_produce(
                &bytes,
                max_dimension,
                want_webp,
                want_thumbnail,
                webp_quality,
                webp_effort,
                thumbnail_width,
                thumbnail_quality,
            )
        })
        .await;
        drop(permit);

        let produced = match produced {
            Ok(Ok(p)) => p,
            Ok(Err(message)) => {
                let pipeline_err = PipelineError::from_message(message);
                let allow_retry = pipeline_err.classification() == Classification::Transient;
                self.fail_all(ctx, &acquired, &pipeline_err.to_string(), allow_retry).await;
                self.invalidate_cache(ctx).await;
                return;
            }
            Err(join_err) => {
                self.fail_all(
                    ctx,
                    &acquired,
                    &format!("internal: decode task did not complete: {join_err}"),
                    true,
                )
                .await;
                self.invalidate_cache(ctx).await;
                return;
            }
        };

        // Step 6: success update, per variant.
        let mut webp_completed = false;
        let mut thumbnail_completed = false;
        for (id, kind) in &acquired {
            let outcome = match kind {
                VariantKind::Webp => &produced.webp,
                VariantKind::Thumbnail => &produced.thumbnail,
            };
            let Some(outcome) = outcome else { continue };
            match outcome {
                Ok(variant) => match self.persist_variant(ctx, *id, *kind, variant).await {
                    Ok(()) => match kind {
                        VariantKind::Webp => webp_completed = true,
                        VariantKind::Thumbnail => thumbnail_completed = true,
                    },
                    Err((message, allow_retry)) => {
                        if let Err(e) = ctx
                            .variants
                            .mark_failed(*id, &message, allow_retry, ctx.config.backoff_base)
                            .await
                        {
                            warn!(variant_id = id, error = %e, "mark_failed failed");
                        }
                    }
                },
                Err(message) => {
                    let pipeline_err = PipelineError::from_message(message.clone());
                    let allow_retry = pipeline_err.classification() == Classification::Transient;
                    if let Err(e) = ctx
                        .variants
                        .mark_failed(*id, &pipeline_err.to_string(), allow_retry, ctx.config.backoff_base)
                        .await
                    {
                        warn!(variant_id = id, error = %e, "mark_failed failed");
                    }
                }
            }
        }

        if webp_completed {
            if let Err(e) = ctx.images.set_variant_status(self.image_id, VariantStatus::Completed).await {
                warn!(image_id = self.image_id, error = %e, "failed to mark image variant_status Completed");
            }
        } else if thumbnail_completed {
            if let Err(e) = ctx
                .images
                .set_variant_status(self.image_id, VariantStatus::ThumbnailCompleted)
                .await
            {
                warn!(image_id = self.image_id, error = %e, "failed to mark image variant_status ThumbnailCompleted");
            }
        }

        // Step 7: cache invalidation, unconditional.
        self.invalidate_cache(ctx).await;
    }

    async fn persist_variant(
        &self,
        ctx: &PipelineContext,
        id: i64,
        kind: VariantKind,
        variant: &codec::ProcessedVariant,
    ) -> Result<(), (String, bool)> {
        let now = Utc::now();
        let path = match kind {
            VariantKind::Webp => storage_path::webp_path(&self.identifier, now),
            VariantKind::Thumbnail => storage_path::thumbnail_path(&self.identifier, variant.width, now),
        };

        ctx.storage
            .put(&path, variant.data.clone())
            .await
            .map_err(|e| {
                let pipeline_err = PipelineError::from_message(e.to_string());
                let allow_retry = pipeline_err.classification() == Classification::Transient;
                (pipeline_err.to_string(), allow_retry)
            })?;

        let storage_identifier = path.rsplit('/').next().unwrap_or(&path).to_string();
        ctx.variants
            .mark_completed(
                id,
                &storage_identifier,
                &path,
                variant.data.len() as i64,
                variant.width as i32,
                variant.height as i32,
            )
            .await
            .map_err(|e| (e.to_string(), true))
    }

    async fn fail_all(&self, ctx: &PipelineContext, acquired: &[(i64, VariantKind)], message: &str, allow_retry: bool) {
        for (id, _) in acquired {
            if let Err(e) = ctx
                .variants
                .mark_failed(*id, message, allow_retry, ctx.config.backoff_base)
                .await
            {
                warn!(variant_id = id, error = %e, "mark_failed failed");
            }
        }
    }

    async fn invalidate_cache(&self, ctx: &PipelineContext) {
        let _ = ctx.cache.delete(&cache::image_key(&self.identifier)).await;
    }
}

fn validate_encoder_config(config: &Config) -> Option<String> {
    if config.webp_quality < 1 || config.webp_quality > 100 {
        return Some(format!("configuration: webp quality out of range: {}", config.webp_quality));
    }
    if config.webp_effort > 6 {
        return Some(format!("configuration: webp effort out of range: {}", config.webp_effort));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_encoder_config_rejects_out_of_range_quality() {
        let mut cfg = Config::from_env();
        cfg.webp_quality = 0;
        let err = validate_encoder_config(&cfg).unwrap();
        assert!(err.contains("quality out of range"));
    }

    #[test]
    fn validate_encoder_config_rejects_out_of_range_effort() {
        let mut cfg = Config::from_env();
        cfg.webp_effort = 7;
        let err = validate_encoder_config(&cfg).unwrap();
        assert!(err.contains("effort out of range"));
    }

    #[test]
    fn validate_encoder_config_accepts_defaults() {
        let cfg = Config::from_env();
        assert!(validate_encoder_config(&cfg).is_none());
    }
}
