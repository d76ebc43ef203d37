//! Adds a partial unique index preventing duplicate pending scheduled pulls
//! for the same connection and job type.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{DatabaseBackend, Statement};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        match backend {
            DatabaseBackend::Postgres => {
                manager
                    .get_connection()
                    .execute(Statement::from_string(
                        backend,
                        "DO $$\nBEGIN\n    IF NOT EXISTS (\n        SELECT 1 FROM pg_indexes\n        WHERE schemaname = current_schema()\n          AND indexname = 'idx_sync_jobs_scheduled_pending'\n    ) THEN\n        CREATE UNIQUE INDEX idx_sync_jobs_scheduled_pending\n            ON sync_jobs (connection_id, job_type)\n            WHERE job_type IN ('orders_sync','products_sync')\n              AND status IN ('pending','processing');\n    END IF;\nEND\n$$;"
                            .to_string(),
                    ))
                    .await
                    .map(|_| ())
            }
            _ => manager
                .get_connection()
                .execute(Statement::from_string(
                    backend,
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_jobs_scheduled_pending \
                     ON sync_jobs (connection_id, job_type) \
                     WHERE job_type IN ('orders_sync','products_sync') AND status IN ('pending','processing')"
                        .to_string(),
                ))
                .await
                .map(|_| ()),
        }
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "DROP INDEX IF EXISTS idx_sync_jobs_scheduled_pending",
            ))
            .await
            .map(|_| ())
    }
}
