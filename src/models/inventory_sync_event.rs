//! InventorySyncEvent entity model
//!
//! Append-only audit trail of inventory pushes and pulls.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Direction values stored in `direction`.
pub mod direction {
    pub const PUSH: &str = "push";
    pub const PULL: &str = "pull";
}

/// InventorySyncEvent entity recording one inventory movement
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "inventory_sync_events")]
pub struct Model {
    /// Unique identifier for the event (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Seller identifier for multi-seller scoping
    pub seller_id: Uuid,

    /// Connection the event belongs to
    pub connection_id: Uuid,

    /// Product mapping the event refers to, when known
    pub mapping_id: Option<Uuid>,

    /// Direction of the movement (push or pull)
    pub direction: String,

    /// Stock level before the movement
    pub quantity_before: Option<i32>,

    /// Stock level after the movement
    pub quantity_after: Option<i32>,

    /// Outcome of the movement (ok or error)
    pub status: String,

    /// Error message when the movement failed
    pub error_message: Option<String>,

    /// Timestamp when the event was recorded
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
