pub use sea_orm_migration::prelude::*;

mod m20250601_000001_create_reports_table;
mod m20250601_000002_create_rate_limits_table;
mod m20250601_000003_create_leads_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250601_000001_create_reports_table::Migration),
            Box::new(m20250601_000002_create_rate_limits_table::Migration),
            Box::new(m20250601_000003_create_leads_table::Migration),
        ]
    }
}
