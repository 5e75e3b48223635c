pub use sea_orm_migration::prelude::*;

mod m20260202_230522_create_table_images;
mod m20260202_231525_create_table_image_variants;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260202_230522_create_table_images::Migration),
            Box::new(m20260202_231525_create_table_image_variants::Migration),
        ]
    }
}
