//! # Images Table Migration
//!
//! ## Purpose
//! The `images` table is the single source of truth for every uploaded source
//! image. It stores the content-addressed identity of the upload (file hash,
//! public identifier) and where its bytes live, completely decoupled from the
//! derived encodings tracked in `image_variants`.
//!
//! ## Key Columns
//! - `file_hash`: full hex SHA-256 of the uploaded bytes. Globally unique among
//!   live (non-deleted) rows; this is the dedup key for the upload service.
//! - `identifier`: the first 12 hex characters of `file_hash`; the public handle
//!   used in `/images/{identifier}`.
//! - `storage_backend_id`: pins the row to the storage provider instance that
//!   holds its bytes, so a deployment can run more than one backend at once.
//! - `variant_status`: mirrors the aggregate progress of the pipeline across all
//!   of this image's variants; does not replace the per-variant status on
//!   `image_variants`.
//! - `pending_deletion`: set by administrative delete before the cascading
//!   cleanup of variants and storage objects runs; distinct from `deleted_at`,
//!   which marks a completed soft delete eligible for restore-on-reupload.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                DO $$
                BEGIN
                    IF NOT EXISTS (SELECT 1 FROM pg_type WHERE typname = 'image_variant_status') THEN
                        CREATE TYPE image_variant_status AS ENUM ('none', 'processing', 'thumbnail_completed', 'completed', 'failed');
                    END IF;
                END$$;
                "#,
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Images::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Images::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Images::Identifier).char_len(12).not_null())
                    .col(ColumnDef::new(Images::FileHash).char_len(64).not_null())
                    .col(
                        ColumnDef::new(Images::OriginalFilename)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Images::FileSizeBytes).big_integer().not_null())
                    .col(ColumnDef::new(Images::MimeType).string_len(127).not_null())
                    .col(ColumnDef::new(Images::StoragePath).string_len(1024).not_null())
                    .col(ColumnDef::new(Images::StorageBackendId).integer().not_null())
                    .col(ColumnDef::new(Images::Width).integer().not_null().default(0))
                    .col(ColumnDef::new(Images::Height).integer().not_null().default(0))
                    .col(ColumnDef::new(Images::OwnerUserId).uuid().not_null())
                    .col(
                        ColumnDef::new(Images::IsPublic)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Images::VariantStatus)
                            .custom(Alias::new("image_variant_status"))
                            .not_null()
                            .default(Expr::cust("'none'::image_variant_status")),
                    )
                    .col(
                        ColumnDef::new(Images::PendingDeletion)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Images::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Images::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Images::DeletedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r#"CREATE UNIQUE INDEX idx_images_identifier ON images (identifier) WHERE deleted_at IS NULL;"#,
            )
            .await?;

        // file_hash is the dedup key: only one live row per hash.
        manager
            .get_connection()
            .execute_unprepared(
                r#"CREATE UNIQUE INDEX idx_images_file_hash_live ON images (file_hash) WHERE deleted_at IS NULL;"#,
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r#"CREATE INDEX idx_images_owner ON images (owner_user_id) WHERE deleted_at IS NULL;"#,
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE OR REPLACE FUNCTION update_updated_at_column()
                RETURNS TRIGGER AS $$
                BEGIN
                    NEW.updated_at = CURRENT_TIMESTAMP;
                    RETURN NEW;
                END;
                $$ language 'plpgsql';
                "#,
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE TRIGGER update_images_updated_at
                BEFORE UPDATE ON images
                FOR EACH ROW
                EXECUTE FUNCTION update_updated_at_column();
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(r#"DROP TRIGGER IF EXISTS update_images_updated_at ON images;"#)
            .await?;
        manager
            .get_connection()
            .execute_unprepared(r#"DROP FUNCTION IF EXISTS update_updated_at_column;"#)
            .await?;
        manager
            .get_connection()
            .execute_unprepared(r#"DROP INDEX IF EXISTS idx_images_identifier;"#)
            .await?;
        manager
            .get_connection()
            .execute_unprepared(r#"DROP INDEX IF EXISTS idx_images_file_hash_live;"#)
            .await?;
        manager
            .get_connection()
            .execute_unprepared(r#"DROP INDEX IF EXISTS idx_images_owner;"#)
            .await?;
        manager
            .drop_table(Table::drop().table(Images::Table).to_owned())
            .await?;
        manager
            .get_connection()
            .execute_unprepared(r#"DROP TYPE IF EXISTS image_variant_status;"#)
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Images {
    Table,
    Id,
    Identifier,
    FileHash,
    OriginalFilename,
    FileSizeBytes,
    MimeType,
    StoragePath,
    StorageBackendId,
    Width,
    Height,
    OwnerUserId,
    IsPublic,
    VariantStatus,
    PendingDeletion,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}
