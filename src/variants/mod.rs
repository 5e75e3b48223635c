//! The variant store: transactional CAS over the `image_variants` table (§4.C).
//! This is the only mutable state shared between the pipeline, the retry
//! scanner, and HTTP handlers — every mutation goes through these primitives.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entity::image_variants::Status;
use std::collections::HashMap;

use crate::error::VariantStoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub id: i64,
    pub image_id: i64,
    pub format: String,
    pub storage_identifier: Option<String>,
    pub storage_path: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub status: Status,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One of `webp` or `thumbnail_<width>` (§3).
pub fn thumbnail_format(width: u32) -> String {
    format!("thumbnail_{width}")
}

#[async_trait]
pub trait VariantStore: Send + Sync {
    /// Enrolls `(image_id, format)`. If a row already exists it is returned
    /// unchanged; concurrent callers racing the unique constraint both land
    /// on the same logical row.
    async fn upsert_pending(&self, image_id: i64, format: &str) -> Result<Variant, VariantStoreError>;

    /// Atomic `UPDATE ... WHERE id = ? AND status = ?`. Returns `true` iff
    /// exactly one row transitioned.
    async fn cas_status(&self, id: i64, expected: Status, next: Status) -> Result<bool, VariantStoreError>;

    async fn mark_completed(
        &self,
        id: i64,
        storage_identifier: &str,
        storage_path: &str,
        file_size_bytes: i64,
        width: i32,
        height: i32,
    ) -> Result<(), VariantStoreError>;

    async fn mark_failed(&self, id: i64, err_msg: &str, allow_retry: bool, backoff_base: std::time::Duration) -> Result<(), VariantStoreError>;

    /// Requires current status = Failed. Bumps retry-count, sets
    /// `next_retry_at`, resets status to Pending.
    async fn reset_for_retry(&self, id: i64, base: std::time::Duration) -> Result<(), VariantStoreError>;

    async fn retryable(&self, now: DateTime<Utc>, max_retries: u32, limit: u32) -> Result<Vec<Variant>, VariantStoreError>;

    async fn orphans(&self, threshold: std::time::Duration, limit: u32) -> Result<Vec<Variant>, VariantStoreError>;

    /// For each `image_id`, which of `formats` do not yet have a `Completed`
    /// row. Used by the scanner so it never re-enqueues finished work.
    async fn missing(
        &self,
        image_ids: &[i64],
        formats: &[&str],
    ) -> Result<HashMap<i64, HashMap<String, bool>>, VariantStoreError>;

    /// Every `Completed` row for one image. The retrieval service uses this
    /// both to feed the negotiator's `completed_formats` set and to resolve
    /// the storage path once a format is chosen.
    async fn completed_for_image(&self, image_id: i64) -> Result<Vec<Variant>, VariantStoreError>;
}
