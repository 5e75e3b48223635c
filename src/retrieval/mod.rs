//! Retrieval service (§4.I): resolves a public identifier to bytes.
//!
//! Cache lookup first, database fallback through a singleflight coalescer so
//! a cache-cold burst against the same identifier only costs one query,
//! format negotiation against whichever variants are actually `Completed`,
//! then a stream (or, for small objects, a cached byte buffer) straight to
//! the caller.

mod singleflight;

use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::cache::{self, CacheProvider};
use crate::config::Config;
use crate::error::{ImageStoreError, RetrievalError};
use crate::images::{Image, ImageStore};
use crate::negotiator::{self, NegotiatedFormat};
use crate::storage::{ObjectStream, StorageProvider};
use crate::variants::VariantStore;
use singleflight::MetadataCoalescer;

pub struct ResolvedImage {
    pub content_type: String,
    pub body: ObjectStream,
}

pub struct RetrievalService {
    cache: Arc<dyn CacheProvider>,
    images: Arc<dyn ImageStore>,
    variants: Arc<dyn VariantStore>,
    storage: Arc<dyn StorageProvider>,
    config: Arc<Config>,
    coalescer: MetadataCoalescer,
}

impl RetrievalService {
    pub fn new(
        cache: Arc<dyn CacheProvider>,
        images: Arc<dyn ImageStore>,
        variants: Arc<dyn VariantStore>,
        storage: Arc<dyn StorageProvider>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            cache,
            images,
            variants,
            storage,
            config,
            coalescer: MetadataCoalescer::new(),
        }
    }

    pub async fn resolve(
        &self,
        identifier: &str,
        accept: &str,
        requester: Option<Uuid>,
    ) -> Result<ResolvedImage, RetrievalError> {
        let image = self.lookup_metadata(identifier).await?;

        if image.deleted_at.is_some() {
            return Err(RetrievalError::NotFound);
        }
        if !image.is_public && requester != Some(image.owner_user_id) {
            return Err(RetrievalError::Forbidden);
        }

        let completed = self
            .variants
            .completed_for_image(image.id)
            .await
            .map_err(|e| RetrievalError::Transient(e.to_string()))?;
        let completed_formats: Vec<&str> = completed
            .iter()
            .filter(|v| v.format == "webp" || v.format == "avif")
            .map(|v| v.format.as_str())
            .collect();
        let enabled_formats: Vec<&str> = if self.config.webp_enabled { vec!["webp"] } else { vec![] };
        let negotiated = negotiator::negotiate(accept, &enabled_formats, &completed_formats);

        let (path, content_type, size_hint) = match negotiated {
            NegotiatedFormat::Original => (image.storage_path.clone(), image.mime_type.clone(), image.file_size_bytes),
            NegotiatedFormat::Webp | NegotiatedFormat::Avif => {
                match completed.iter().find(|v| v.format == negotiated.as_str()) {
                    Some(variant) if variant.storage_path.is_some() => (
                        variant.storage_path.clone().unwrap(),
                        format!("image/{}", negotiated.as_str()),
                        variant.file_size_bytes.unwrap_or(image.file_size_bytes),
                    ),
                    _ => {
                        warn!(
                            identifier,
                            format = negotiated.as_str(),
                            "negotiator picked a format with no completed storage path, falling back to original"
                        );
                        (image.storage_path.clone(), image.mime_type.clone(), image.file_size_bytes)
                    }
                }
            }
        };

        self.stream_path(identifier, negotiated.as_str(), &path, &content_type, size_hint)
            .await
    }

    /// `data_key` is keyed by `identifier`/negotiated format rather than
    /// `path`, matching the documented `image_data:<identifier>` cache
    /// namespace: one identifier resolves to several storage paths
    /// (original, webp, thumbnail), so the format is folded into the key to
    /// keep them from colliding.
    async fn stream_path(
        &self,
        identifier: &str,
        format: &str,
        path: &str,
        content_type: &str,
        size_hint: i64,
    ) -> Result<ResolvedImage, RetrievalError> {
        let data_key = cache::image_data_key(&format!("{identifier}:{format}"));

        if let Ok(bytes) = self.cache.get_bytes(&data_key).await {
            return Ok(ResolvedImage {
                content_type: content_type.to_string(),
                body: Box::new(tokio::io::BufReader::new(std::io::Cursor::new(bytes))),
            });
        }

        if size_hint >= 0 && (size_hint as u64) <= self.config.image_data_cache_max_bytes {
            let bytes = self.storage.get_bytes(path, self.config.image_data_cache_max_bytes).await?;
            if let Err(e) = self
                .cache
                .set_bytes(&data_key, bytes.clone(), self.config.image_data_cache_ttl)
                .await
            {
                warn!(path, error = %e, "failed to warm image-data cache");
            }
            return Ok(ResolvedImage {
                content_type: content_type.to_string(),
                body: Box::new(tokio::io::BufReader::new(std::io::Cursor::new(bytes))),
            });
        }

        let body = self.storage.get(path).await?;
        Ok(ResolvedImage {
            content_type: content_type.to_string(),
            body,
        })
    }

    /// Cache hit first; otherwise a singleflight-coalesced DB lookup so a
    /// cold burst against the same identifier costs one query, not N. The
    /// coalescer evicts its entry on every completion, so a transient DB
    /// error never leaves the next caller waiting on a stale failure.
    async fn lookup_metadata(&self, identifier: &str) -> Result<Image, RetrievalError> {
        let cache_key = cache::image_key(identifier);
        match cache::get_json::<Image>(self.cache.as_ref(), &cache_key).await {
            Ok(image) => return Ok(image),
            Err(e) => {
                if !matches!(e, crate::error::CacheError::Miss) {
                    warn!(identifier, error = %e, "image cache lookup failed, falling through to database");
                }
            }
        }

        let images = self.images.clone();
        let identifier_owned = identifier.to_string();
        let result = self
            .coalescer
            .get_or_fetch(identifier, move || async move { images.find_by_identifier(&identifier_owned).await })
            .await;

        let image = match result {
            Ok(image) => image,
            Err(ImageStoreError::NotFound) => return Err(RetrievalError::NotFound),
            Err(ImageStoreError::Forbidden) => return Err(RetrievalError::Forbidden),
            Err(e) => return Err(RetrievalError::Transient(e.to_string())),
        };

        if let Err(e) = cache::set_json(self.cache.as_ref(), &cache_key, &image, self.config.image_cache_ttl).await {
            warn!(identifier, error = %e, "failed to warm image cache after database lookup");
        }

        Ok(image)
    }
}
