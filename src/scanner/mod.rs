//! Retry scanner (§4.J): a periodic job that rescues variants whose worker
//! crashed mid-flight and re-queues variants that failed and are past their
//! backoff, without ever competing with the pipeline's own CAS.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::images::ImageStore;
use crate::pipeline::{PipelineContext, PipelineTask};
use crate::variants::{Variant, VariantStore};
use crate::worker_pool::{CancelToken, WorkerPool};
use entity::image_variants::Status;

pub struct RetryScanner {
    variants: Arc<dyn VariantStore>,
    images: Arc<dyn ImageStore>,
    pool: Arc<WorkerPool>,
    pipeline_ctx: PipelineContext,
    config: Arc<Config>,
}

impl RetryScanner {
    pub fn new(
        variants: Arc<dyn VariantStore>,
        images: Arc<dyn ImageStore>,
        pool: Arc<WorkerPool>,
        pipeline_ctx: PipelineContext,
        config: Arc<Config>,
    ) -> Self {
        Self {
            variants,
            images,
            pool,
            pipeline_ctx,
            config,
        }
    }

    /// Runs until cancelled. Intended to be spawned once at startup.
    pub async fn run(&self, cancel: CancelToken) {
        if !self.config.scanner_enabled {
            return;
        }
        let mut ticker = tokio::time::interval(self.config.scanner_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = cancel.cancelled() => return,
            }
        }
    }

    async fn tick(&self) {
        self.sweep_orphans().await;
        self.requeue_retryable().await;
    }

    /// A variant stuck in Processing past the orphan threshold had its
    /// worker die mid-flight. Resetting it to Pending is all the scanner
    /// does here — per §4.J it does not resubmit a task itself; the row
    /// becomes claimable again the next time something dispatches its image.
    async fn sweep_orphans(&self) {
        let orphans = match self
            .variants
            .orphans(self.config.orphan_threshold, self.config.scanner_batch_size)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "scanner: orphan sweep query failed");
                return;
            }
        };
        for variant in &orphans {
            match self.variants.cas_status(variant.id, Status::Processing, Status::Pending).await {
                Ok(true) => info!(variant_id = variant.id, "scanner: reset orphaned variant to pending"),
                Ok(false) => {}
                Err(e) => warn!(variant_id = variant.id, error = %e, "scanner: failed to reset orphan"),
            }
        }
    }

    async fn requeue_retryable(&self) {
        let now = chrono::Utc::now();
        let retryable = match self
            .variants
            .retryable(now, self.config.max_retries, self.config.scanner_batch_size)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "scanner: retryable query failed");
                return;
            }
        };

        for variant in retryable {
            if let Err(e) = self.variants.reset_for_retry(variant.id, self.config.backoff_base).await {
                warn!(variant_id = variant.id, error = %e, "scanner: reset_for_retry failed");
                continue;
            }
            self.resubmit(&variant).await;
        }
    }

    async fn resubmit(&self, variant: &Variant) {
        let image = match self.images.find_by_id(variant.image_id).await {
            Ok(image) => image,
            Err(e) => {
                warn!(variant_id = variant.id, image_id = variant.image_id, error = %e, "scanner: image lookup failed, skipping resubmit");
                return;
            }
        };

        let task = PipelineTask {
            image_id: image.id,
            identifier: image.identifier,
            source_path: image.storage_path,
            webp_variant_id: (variant.format == "webp").then_some(variant.id),
            thumbnail_variant_id: variant.format.starts_with("thumbnail_").then_some(variant.id),
        };

        let ctx = self.pipeline_ctx.clone();
        let cancel = CancelToken::new();
        if !self.pool.submit(async move { task.run(ctx, cancel).await }) {
            warn!(variant_id = variant.id, "scanner: worker pool queue full, resubmit dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_variant(id: i64, format: &str) -> Variant {
        let now = chrono::Utc::now();
        Variant {
            id,
            image_id: 7,
            format: format.to_string(),
            storage_identifier: None,
            storage_path: None,
            file_size_bytes: None,
            width: None,
            height: None,
            status: Status::Failed,
            error_message: None,
            retry_count: 1,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn webp_format_maps_to_the_webp_slot_only() {
        let variant = sample_variant(1, "webp");
        assert!(variant.format == "webp");
        assert!(!variant.format.starts_with("thumbnail_"));
    }

    #[test]
    fn thumbnail_format_maps_to_the_thumbnail_slot_only() {
        let variant = sample_variant(2, "thumbnail_600");
        assert!(variant.format != "webp");
        assert!(variant.format.starts_with("thumbnail_"));
    }
}
