//! JobRunLog entity model
//!
//! One row per execution attempt of a sync job. Rows become immutable once
//! `finished_at` is set.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Run status values stored in `status`.
pub mod status {
    pub const RUNNING: &str = "running";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

/// JobRunLog entity recording one execution attempt of a sync job
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "job_run_logs")]
pub struct Model {
    /// Unique identifier for the run (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Sync job this run belongs to; null for scheduled maintenance runs
    pub job_id: Option<Uuid>,

    /// Human-readable job name, e.g. "orders_sync:shopify"
    pub job_name: String,

    /// Timestamp when the run started
    pub started_at: DateTimeWithTimeZone,

    /// Timestamp when the run finished; null while running
    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Current status of the run (running, completed, failed)
    pub status: String,

    /// Records created or re-activated during the run
    pub activated_count: i32,

    /// Records deactivated during the run
    pub deactivated_count: i32,

    /// Total records processed during the run
    pub processed_count: i32,

    /// Records that failed processing during the run
    pub failed_count: i32,

    /// Error message if the run failed
    pub error_message: Option<String>,

    /// Run-specific metadata, e.g. cursor positions or page counts
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Option<JsonValue>,

    /// Timestamp when the row was created
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
