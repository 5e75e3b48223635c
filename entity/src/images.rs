use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "images")]
pub struct Model {
    #[sea_orm(primary_key)]
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

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, serde::Serialize, serde::Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "image_variant_status")]
pub enum VariantStatus {
    #[sea_orm(string_value = "none")]
    None,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "thumbnail_completed")]
    ThumbnailCompleted,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    ImageVariants,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Self::ImageVariants => Entity::has_many(super::image_variants::Entity).into(),
        }
    }
}

impl Related<super::image_variants::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ImageVariants.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
