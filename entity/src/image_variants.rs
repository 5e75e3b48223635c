use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "image_variants")]
pub struct Model {
    #[sea_orm(primary_key)]
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
    pub next_retry_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, serde::Serialize, serde::Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "variant_status")]
pub enum Status {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    Images,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Self::Images => Entity::belongs_to(super::images::Entity)
                .from(Column::ImageId)
                .to(super::images::Column::Id)
                .on_delete(ForeignKeyAction::Cascade)
                .on_update(ForeignKeyAction::Cascade)
                .into(),
        }
    }
}

impl Related<super::images::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Images.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
