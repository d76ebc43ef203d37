//! Database migrations for the channel sync engine.

pub use sea_orm_migration::prelude::*;

mod m2025_12_01_000100_create_channel_connections;
mod m2025_12_01_000200_create_sync_jobs;
mod m2025_12_01_000300_create_job_run_logs;
mod m2025_12_01_000400_create_channel_orders;
mod m2025_12_01_000500_create_product_mappings;
mod m2025_12_01_000600_create_inventory_sync_events;
mod m2025_12_01_000700_create_oauth_states;
mod m2025_12_02_000100_add_sync_job_pending_guard;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_12_01_000100_create_channel_connections::Migration),
            Box::new(m2025_12_01_000200_create_sync_jobs::Migration),
            Box::new(m2025_12_01_000300_create_job_run_logs::Migration),
            Box::new(m2025_12_01_000400_create_channel_orders::Migration),
            Box::new(m2025_12_01_000500_create_product_mappings::Migration),
            Box::new(m2025_12_01_000600_create_inventory_sync_events::Migration),
            Box::new(m2025_12_01_000700_create_oauth_states::Migration),
            Box::new(m2025_12_02_000100_add_sync_job_pending_guard::Migration),
        ]
    }
}
