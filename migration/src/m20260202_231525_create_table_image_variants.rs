//! # Image Variants Table Migration
//!
//! ## Purpose
//! The `image_variants` table stores one row per `(image_id, format)` pair
//! produced by the variant pipeline: the full-resolution WebP re-encode, and a
//! WebP thumbnail per configured width. The original upload is never modified;
//! this table only ever holds derived encodings.
//!
//! ## Key Columns
//! - `format`: discriminated string, `webp` or `thumbnail_<width>`.
//! - `status`: drives the CAS state machine (`pending` → `processing` →
//!   `completed` | `failed`); `retry_count` / `next_retry_at` support the
//!   backoff scanner.
//! - `(image_id, format)` is unique: at most one row exists per pair, enforced
//!   here rather than re-derived at the application layer.

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
                    IF NOT EXISTS (SELECT 1 FROM pg_type WHERE typname = 'variant_status') THEN
                        CREATE TYPE variant_status AS ENUM ('pending', 'processing', 'completed', 'failed');
                    END IF;
                END$$;
                "#,
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ImageVariants::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ImageVariants::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ImageVariants::ImageId).big_integer().not_null())
                    .col(ColumnDef::new(ImageVariants::Format).string_len(50).not_null())
                    .col(ColumnDef::new(ImageVariants::StorageIdentifier).string_len(255))
                    .col(ColumnDef::new(ImageVariants::StoragePath).string_len(1024))
                    .col(ColumnDef::new(ImageVariants::FileSizeBytes).big_integer())
                    .col(ColumnDef::new(ImageVariants::Width).integer())
                    .col(ColumnDef::new(ImageVariants::Height).integer())
                    .col(
                        ColumnDef::new(ImageVariants::Status)
                            .custom(Alias::new("variant_status"))
                            .not_null()
                            .default(Expr::cust("'pending'::variant_status")),
                    )
                    .col(ColumnDef::new(ImageVariants::ErrorMessage).text())
                    .col(
                        ColumnDef::new(ImageVariants::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ImageVariants::NextRetryAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(ImageVariants::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ImageVariants::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_image_variants_image_id")
                            .from(ImageVariants::Table, ImageVariants::ImageId)
                            .to(Images::Table, Images::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r#"CREATE UNIQUE INDEX idx_image_variants_unique ON image_variants (image_id, format);"#,
            )
            .await?;
        manager
            .get_connection()
            .execute_unprepared(
                r#"CREATE INDEX idx_image_variants_retryable ON image_variants (status, retry_count, next_retry_at) WHERE status = 'failed';"#,
            )
            .await?;
        manager
            .get_connection()
            .execute_unprepared(
                r#"CREATE INDEX idx_image_variants_orphans ON image_variants (status, updated_at) WHERE status = 'processing';"#,
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE TRIGGER update_image_variants_updated_at
                BEFORE UPDATE ON image_variants
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
            .execute_unprepared(
                r#"DROP TRIGGER IF EXISTS update_image_variants_updated_at ON image_variants;"#,
            )
            .await?;
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                DROP INDEX IF EXISTS idx_image_variants_unique;
                DROP INDEX IF EXISTS idx_image_variants_retryable;
                DROP INDEX IF EXISTS idx_image_variants_orphans;
                "#,
            )
            .await?;
        manager
            .drop_table(Table::drop().table(ImageVariants::Table).to_owned())
            .await?;
        manager
            .get_connection()
            .execute_unprepared(r#"DROP TYPE IF EXISTS variant_status;"#)
            .await
    }
}

#[derive(DeriveIden)]
enum ImageVariants {
    Table,
    Id,
    ImageId,
    Format,
    StorageIdentifier,
    StoragePath,
    FileSizeBytes,
    Width,
    Height,
    Status,
    ErrorMessage,
    RetryCount,
    NextRetryAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Images {
    Table,
    Id,
}
