//! The Image record: the canonical row for an uploaded source (§3).

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entity::images::VariantStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ImageStoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub identifier: String,
    pub file_hash: String,
    pub original_filename: String,
    pub file_size_bytes: i64,
    pub mime_type: String,
    pub storage_path: String,
    pub storage_backend_id: i32,
    pub width: i32,
    pub height: i32,
    pub owner_user_id: Uuid,
    pub is_public: bool,
    pub variant_status: VariantStatus,
    pub pending_deletion: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Image {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

pub struct NewImage {
    pub identifier: String,
    pub file_hash: String,
    pub original_filename: String,
    pub file_size_bytes: i64,
    pub mime_type: String,
    pub storage_path: String,
    pub storage_backend_id: i32,
    pub width: i32,
    pub height: i32,
    pub owner_user_id: Uuid,
    pub is_public: bool,
}

/// Fields rewritten when a soft-deleted image is restored by a re-upload of
/// the same bytes (§3, §4.H): clears `deleted_at` and re-binds ownership.
pub struct RestoreImage {
    pub owner_user_id: Uuid,
    pub original_filename: String,
    pub is_public: bool,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn insert(&self, new: NewImage) -> Result<Image, ImageStoreError>;
    async fn find_by_identifier(&self, identifier: &str) -> Result<Image, ImageStoreError>;
    /// Looked up by surrogate id rather than public identifier; the scanner
    /// only has `ImageVariant.image_id` to work from.
    async fn find_by_id(&self, id: i64) -> Result<Image, ImageStoreError>;
    /// A live (not soft-deleted) row for this hash, if one exists.
    async fn find_live_by_hash(&self, file_hash: &str) -> Result<Option<Image>, ImageStoreError>;
    /// A soft-deleted row for this hash, if one exists.
    async fn find_deleted_by_hash(&self, file_hash: &str) -> Result<Option<Image>, ImageStoreError>;
    async fn restore(&self, id: i64, restore: RestoreImage) -> Result<Image, ImageStoreError>;
    async fn set_variant_status(&self, id: i64, status: VariantStatus) -> Result<(), ImageStoreError>;
    async fn set_dimensions(&self, id: i64, width: i32, height: i32) -> Result<(), ImageStoreError>;
}
