//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the sync_jobs table,
//! which represents one durable unit of queued sync work for a connection.

use super::channel_connection::Entity as ChannelConnection;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Job status values stored in `status`.
pub mod status {
    pub const PENDING: &str = "pending";
    pub const PROCESSING: &str = "processing";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";

    pub const ALL: &[&str] = &[PENDING, PROCESSING, COMPLETED, FAILED];
}

/// Job type values stored in `job_type`.
pub mod job_type {
    pub const ORDERS_SYNC: &str = "orders_sync";
    pub const PRODUCTS_SYNC: &str = "products_sync";
    pub const INVENTORY_SYNC: &str = "inventory_sync";
    pub const WEBHOOK_EVENT: &str = "webhook_event";

    pub const ALL: &[&str] = &[ORDERS_SYNC, PRODUCTS_SYNC, INVENTORY_SYNC, WEBHOOK_EVENT];
}

/// SyncJob entity representing queued or in-flight sync work
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Seller identifier for multi-seller scoping
    pub seller_id: Uuid,

    /// Connection identifier this job is associated with
    pub connection_id: Uuid,

    /// Channel slug this job targets (denormalized from the connection)
    pub channel_type: String,

    /// Type of job (orders_sync, products_sync, inventory_sync, webhook_event)
    pub job_type: String,

    /// Current status of the job (pending, processing, completed, failed)
    pub status: String,

    /// Job priority for scheduling (higher values = higher priority)
    pub priority: i16,

    /// Number of attempts made for this job
    pub attempts: i32,

    /// Attempt ceiling after which the job is marked failed
    pub max_attempts: i32,

    /// Timestamp when the job becomes eligible to run
    pub scheduled_for: DateTimeWithTimeZone,

    /// Timestamp when the current/last attempt started
    pub started_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the job reached a terminal status
    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Job-type-specific parameters (e.g. a webhook event payload)
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Option<JsonValue>,

    /// Opaque channel cursor for incremental sync state
    #[sea_orm(column_type = "JsonBinary")]
    pub cursor: Option<JsonValue>,

    /// Structured error details from the most recent failed attempt
    #[sea_orm(column_type = "JsonBinary")]
    pub last_error: Option<JsonValue>,

    /// Timestamp when the sync job was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the sync job was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "ChannelConnection",
        from = "Column::ConnectionId",
        to = "super::channel_connection::Column::Id"
    )]
    ChannelConnection,
}

impl Related<ChannelConnection> for Entity {
    fn to() -> RelationDef {
        Relation::ChannelConnection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
