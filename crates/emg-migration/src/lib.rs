use sea_orm_migration::prelude::*;

mod m0001_create_profiles;
mod m0002_create_refresh_tokens;
mod m0003_create_audit_events;
mod m0004_create_reference_tables;
mod m0005_create_devices;
mod m0006_create_orders;
mod m0007_create_deployments;
mod m0008_create_maintenance_records;
mod m0009_add_reference_descriptions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m0001_create_profiles::Migration),
            Box::new(m0002_create_refresh_tokens::Migration),
            Box::new(m0003_create_audit_events::Migration),
            Box::new(m0004_create_reference_tables::Migration),
            Box::new(m0005_create_devices::Migration),
            Box::new(m0006_create_orders::Migration),
            Box::new(m0007_create_deployments::Migration),
            Box::new(m0008_create_maintenance_records::Migration),
            Box::new(m0009_add_reference_descriptions::Migration),
        ]
    }
}
