//! ChannelOrder entity model
//!
//! Normalized order ledger row. One row per (connection, channel order id);
//! repeated imports of the same order update the row in place.

use super::channel_connection::Entity as ChannelConnection;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// ChannelOrder entity representing one imported order from a channel
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "channel_orders")]
pub struct Model {
    /// Unique identifier for the order row (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Seller identifier for multi-seller scoping
    pub seller_id: Uuid,

    /// Connection the order was imported through
    pub connection_id: Uuid,

    /// Channel-side order identifier (unique per connection)
    pub channel_order_id: String,

    /// Human-facing order number shown by the channel, if distinct
    pub channel_order_number: Option<String>,

    /// Normalized order status (pending, paid, processing, shipped,
    /// delivered, cancelled, refunded)
    pub status: String,

    /// Order total as a decimal string, preserving channel precision
    pub total_amount: String,

    /// ISO 4217 currency code
    pub currency: String,

    /// Customer email, when the channel exposes it
    pub customer_email: Option<String>,

    /// Raw channel payload as received, for audit and re-processing
    #[sea_orm(column_type = "JsonBinary")]
    pub raw_payload: JsonValue,

    /// Channel-side last-modified timestamp used for monotonic upserts
    pub channel_updated_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the row was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the row was last updated
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
