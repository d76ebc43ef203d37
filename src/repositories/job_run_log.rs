//! # JobRunLog Repository
//!
//! Persists one row per worker run for operational history and the CSV
//! export endpoint.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiError, ErrorType};
use crate::models::job_run_log::{self, Column, Entity, Model, status};

/// Counter updates recorded when a run finishes
#[derive(Debug, Clone, Copy, Default)]
pub struct RunCounts {
    pub activated: i32,
    pub deactivated: i32,
    pub processed: i32,
    pub failed: i32,
}

/// Filters accepted by the run listing and CSV export
#[derive(Debug, Clone, Default)]
pub struct RunExportFilter {
    pub job_name: Option<String>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
}

/// Repository for job run log database operations
#[derive(Debug, Clone)]
pub struct JobRunLogRepository {
    db: Arc<DatabaseConnection>,
}

impl JobRunLogRepository {
    /// Create a new JobRunLogRepository with the given database connection
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Open a run log entry in the `running` state
    pub async fn start_run(
        &self,
        job_id: Option<Uuid>,
        job_name: &str,
        metadata: Option<JsonValue>,
    ) -> Result<Model, ApiError> {
        let now = Utc::now().fixed_offset();

        let entry = job_run_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            job_id: Set(job_id),
            job_name: Set(job_name.to_string()),
            started_at: Set(now),
            finished_at: Set(None),
            status: Set(status::RUNNING.to_string()),
            activated_count: Set(0),
            deactivated_count: Set(0),
            processed_count: Set(0),
            failed_count: Set(0),
            error_message: Set(None),
            metadata: Set(metadata),
            created_at: Set(now),
        };

        let run_id = match &entry.id {
            sea_orm::ActiveValue::Set(id) => *id,
            _ => unreachable!(),
        };

        entry.insert(&*self.db).await?;
        Entity::find_by_id(run_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ApiError::from(ErrorType::InternalServerError))
    }

    /// Close a run log entry with its final status and counters
    pub async fn finalize(
        &self,
        run_id: Uuid,
        final_status: &str,
        counts: RunCounts,
        error_message: Option<String>,
    ) -> Result<Model, ApiError> {
        let run = Entity::find_by_id(run_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ApiError::from(ErrorType::NotFound))?;

        let mut active: job_run_log::ActiveModel = run.into();
        active.finished_at = Set(Some(Utc::now().fixed_offset()));
        active.status = Set(final_status.to_string());
        active.activated_count = Set(counts.activated);
        active.deactivated_count = Set(counts.deactivated);
        active.processed_count = Set(counts.processed);
        active.failed_count = Set(counts.failed);
        active.error_message = Set(error_message);

        Ok(active.update(&*self.db).await?)
    }

    /// List the most recent run log entries, newest first
    pub async fn list_recent(
        &self,
        filter: &RunExportFilter,
        limit: u64,
    ) -> Result<Vec<Model>, ApiError> {
        let mut query = Entity::find()
            .order_by(Column::StartedAt, Order::Desc)
            .order_by(Column::Id, Order::Desc)
            .limit(limit);

        if let Some(name) = &filter.job_name {
            query = query.filter(Column::JobName.eq(name.as_str()));
        }
        if let Some(after) = filter.started_after {
            query = query.filter(Column::StartedAt.gte(after));
        }
        if let Some(before) = filter.started_before {
            query = query.filter(Column::StartedAt.lt(before));
        }

        Ok(query.all(&*self.db).await?)
    }

    /// Render run log entries as CSV for the export endpoint.
    ///
    /// Columns: id, job_name, started_at, finished_at, status,
    /// activated_count, deactivated_count, error_message, metadata.
    pub async fn export_csv(
        &self,
        filter: &RunExportFilter,
        limit: u64,
    ) -> Result<String, ApiError> {
        let runs = self.list_recent(filter, limit).await?;

        let mut out = String::from(
            "id,job_name,started_at,finished_at,status,activated_count,deactivated_count,error_message,metadata\n",
        );
        for run in runs {
            let metadata = run
                .metadata
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_default();
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{},{}\n",
                run.id,
                csv_escape(&run.job_name),
                run.started_at.to_rfc3339(),
                run.finished_at
                    .map(|ts| ts.to_rfc3339())
                    .unwrap_or_default(),
                csv_escape(&run.status),
                run.activated_count,
                run.deactivated_count,
                csv_escape(run.error_message.as_deref().unwrap_or("")),
                csv_escape(&metadata),
            ));
        }

        Ok(out)
    }
}

/// Quote a CSV field when it contains separators, quotes, or newlines
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
