//! Migration to create the job_run_logs table.
//!
//! One row per execution attempt of a sync job (or a scheduled maintenance
//! run). Rows are append-only once finished_at is set.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(JobRunLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobRunLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(JobRunLogs::JobId).uuid().null())
                    .col(ColumnDef::new(JobRunLogs::JobName).text().not_null())
                    .col(
                        ColumnDef::new(JobRunLogs::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(JobRunLogs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(JobRunLogs::Status)
                            .text()
                            .not_null()
                            .default("running"),
                    )
                    .col(
                        ColumnDef::new(JobRunLogs::ActivatedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(JobRunLogs::DeactivatedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(JobRunLogs::ProcessedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(JobRunLogs::FailedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(JobRunLogs::ErrorMessage).text().null())
                    .col(ColumnDef::new(JobRunLogs::Metadata).json_binary().null())
                    .col(
                        ColumnDef::new(JobRunLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_job_run_logs_job_id")
                    .table(JobRunLogs::Table)
                    .col(JobRunLogs::JobId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_job_run_logs_started_at")
                    .table(JobRunLogs::Table)
                    .col(JobRunLogs::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_job_run_logs_job_id").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_job_run_logs_started_at").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(JobRunLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum JobRunLogs {
    Table,
    Id,
    JobId,
    JobName,
    StartedAt,
    FinishedAt,
    Status,
    ActivatedCount,
    DeactivatedCount,
    ProcessedCount,
    FailedCount,
    ErrorMessage,
    Metadata,
    CreatedAt,
}
