pub use sea_orm_migration::prelude::*;

mod m20261001_000000_bootstrap;
mod m20261001_000001_create_tenancy;
mod m20261001_000002_create_eligible_records;
mod m20261001_000003_create_triage_rules;
mod m20261001_000004_create_occurrences;
mod m20261001_000005_create_notifications;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000000_bootstrap::Migration),
            Box::new(m20261001_000001_create_tenancy::Migration),
            Box::new(m20261001_000002_create_eligible_records::Migration),
            Box::new(m20261001_000003_create_triage_rules::Migration),
            Box::new(m20261001_000004_create_occurrences::Migration),
            Box::new(m20261001_000005_create_notifications::Migration),
        ]
    }
}
