use async_trait::async_trait;
use chrono::Utc;
use entity::images::{ActiveModel, Column, Entity, Model, VariantStatus};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ImageStoreError;

use super::{Image, ImageStore, NewImage, RestoreImage};

#[derive(Clone)]
pub struct ImageStorePostgres {
    db: Arc<DatabaseConnection>,
}

impl ImageStorePostgres {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn map_db_err(e: sea_orm::DbErr) -> ImageStoreError {
    ImageStoreError::Database(e.to_string())
}

fn from_model(m: Model) -> Image {
    Image {
        id: m.id,
        identifier: m.identifier,
        file_hash: m.file_hash,
        original_filename: m.original_filename,
        file_size_bytes: m.file_size_bytes,
        mime_type: m.mime_type,
        storage_path: m.storage_path,
        storage_backend_id: m.storage_backend_id,
        width: m.width,
        height: m.height,
        owner_user_id: m.owner_user_id,
        is_public: m.is_public,
        variant_status: m.variant_status,
        pending_deletion: m.pending_deletion,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
        deleted_at: m.deleted_at.map(|d| d.with_timezone(&Utc)),
    }
}

#[async_trait]
impl ImageStore for ImageStorePostgres {
    async fn insert(&self, new: NewImage) -> Result<Image, ImageStoreError> {
        let now = Utc::now().fixed_offset();
        let active = ActiveModel {
            identifier: Set(new.identifier),
            file_hash: Set(new.file_hash),
            original_filename: Set(new.original_filename),
            file_size_bytes: Set(new.file_size_bytes),
            mime_type: Set(new.mime_type),
            storage_path: Set(new.storage_path),
            storage_backend_id: Set(new.storage_backend_id),
            width: Set(new.width),
            height: Set(new.height),
            owner_user_id: Set(new.owner_user_id),
            is_public: Set(new.is_public),
            variant_status: Set(VariantStatus::None),
            pending_deletion: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
            ..Default::default()
        };
        let model = active.insert(self.db.as_ref()).await.map_err(map_db_err)?;
        Ok(from_model(model))
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Image, ImageStoreError> {
        let model = Entity::find()
            .filter(Column::Identifier.eq(identifier))
            .filter(Column::DeletedAt.is_null())
            .one(self.db.as_ref())
            .await
            .map_err(map_db_err)?
            .ok_or(ImageStoreError::NotFound)?;
        Ok(from_model(model))
    }

    async fn find_by_id(&self, id: i64) -> Result<Image, ImageStoreError> {
        let model = Entity::find_by_id(id)
            .filter(Column::DeletedAt.is_null())
            .one(self.db.as_ref())
            .await
            .map_err(map_db_err)?
            .ok_or(ImageStoreError::NotFound)?;
        Ok(from_model(model))
    }

    async fn find_live_by_hash(&self, file_hash: &str) -> Result<Option<Image>, ImageStoreError> {
        let model = Entity::find()
            .filter(Column::FileHash.eq(file_hash))
            .filter(Column::DeletedAt.is_null())
            .one(self.db.as_ref())
            .await
            .map_err(map_db_err)?;
        Ok(model.map(from_model))
    }

    async fn find_deleted_by_hash(&self, file_hash: &str) -> Result<Option<Image>, ImageStoreError> {
        let model = Entity::find()
            .filter(Column::FileHash.eq(file_hash))
            .filter(Column::DeletedAt.is_not_null())
            .one(self.db.as_ref())
            .await
            .map_err(map_db_err)?;
        Ok(model.map(from_model))
    }

    async fn restore(&self, id: i64, restore: RestoreImage) -> Result<Image, ImageStoreError> {
        let now = Utc::now().fixed_offset();
        let active = ActiveModel {
            id: Set(id),
            owner_user_id: Set(restore.owner_user_id),
            original_filename: Set(restore.original_filename),
            is_public: Set(restore.is_public),
            deleted_at: Set(None),
            updated_at: Set(now),
            ..Default::default()
        };
        let model = active.update(self.db.as_ref()).await.map_err(map_db_err)?;
        Ok(from_model(model))
    }

    async fn set_variant_status(&self, id: i64, status: VariantStatus) -> Result<(), ImageStoreError> {
        let active = ActiveModel {
            id: Set(id),
            variant_status: Set(status),
            updated_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };
        active.update(self.db.as_ref()).await.map_err(map_db_err)?;
        Ok(())
    }

    async fn set_dimensions(&self, id: i64, width: i32, height: i32) -> Result<(), ImageStoreError> {
        let active = ActiveModel {
            id: Set(id),
            width: Set(width),
            height: Set(height),
            updated_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };
        active.update(self.db.as_ref()).await.map_err(map_db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn sample_model(hash: &str, deleted: bool) -> Model {
        let now = Utc::now().fixed_offset();
        Model {
            id: 1,
            identifier: hash[..12].to_string(),
            file_hash: hash.to_string(),
            original_filename: "cat.jpg".to_string(),
            file_size_bytes: 2048,
            mime_type: "image/jpeg".to_string(),
            storage_path: "original/2026/03/07/abc.jpg".to_string(),
            storage_backend_id: 1,
            width: 800,
            height: 600,
            owner_user_id: Uuid::new_v4(),
            is_public: true,
            variant_status: VariantStatus::None,
            pending_deletion: false,
            created_at: now,
            updated_at: now,
            deleted_at: if deleted { Some(now) } else { None },
        }
    }

    #[tokio::test]
    async fn find_live_by_hash_returns_none_when_only_deleted_row_exists() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<Model>::new()])
            .into_connection();
        let store = ImageStorePostgres::new(Arc::new(db));
        let result = store.find_live_by_hash("deadbeef").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn find_by_id_maps_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<Model>::new()])
            .into_connection();
        let store = ImageStorePostgres::new(Arc::new(db));
        let err = store.find_by_id(1).await.unwrap_err();
        assert!(matches!(err, ImageStoreError::NotFound));
    }

    #[tokio::test]
    async fn find_by_identifier_maps_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<Model>::new()])
            .into_connection();
        let store = ImageStorePostgres::new(Arc::new(db));
        let err = store.find_by_identifier("abc123").await.unwrap_err();
        assert!(matches!(err, ImageStoreError::NotFound));
    }

    #[tokio::test]
    async fn find_live_by_hash_returns_matching_row() {
        let model = sample_model("deadbeefcafe0102030405060708090a0b0c0d0e0f", false);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![model.clone()]])
            .into_connection();
        let store = ImageStorePostgres::new(Arc::new(db));
        let result = store.find_live_by_hash(&model.file_hash).await.unwrap();
        assert_eq!(result.unwrap().file_hash, model.file_hash);
    }

    #[tokio::test]
    async fn set_variant_status_issues_an_update() {
        let mut model = sample_model("deadbeefcafe0102030405060708090a0b0c0d0e0f", false);
        model.variant_status = VariantStatus::Completed;
        // Postgres returns the updated row via `UPDATE ... RETURNING`, which
        // sea_orm surfaces as a query result rather than a bare exec count.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![model]])
            .into_connection();
        let store = ImageStorePostgres::new(Arc::new(db));
        store.set_variant_status(1, VariantStatus::Completed).await.unwrap();
    }
}
