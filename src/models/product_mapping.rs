//! ProductMapping entity model
//!
//! Links a local product to its listing on a channel. Channels without
//! variants store an empty string variant id so the natural key stays
//! three columns wide.

use super::channel_connection::Entity as ChannelConnection;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// ProductMapping entity linking a local product to a channel listing
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "product_mappings")]
pub struct Model {
    /// Unique identifier for the mapping (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Seller identifier for multi-seller scoping
    pub seller_id: Uuid,

    /// Connection the mapping belongs to
    pub connection_id: Uuid,

    /// Local product identifier
    pub product_id: Uuid,

    /// Channel-side product identifier
    pub channel_product_id: String,

    /// Channel-side variant identifier; empty string when the channel has
    /// no variant concept
    pub channel_variant_id: String,

    /// Channel-side SKU, when exposed
    pub channel_sku: Option<String>,

    /// Multiplier applied to the local price when pushing to the channel
    pub price_multiplier: f64,

    /// Fixed offset added to the local price when pushing to the channel
    pub price_offset: f64,

    /// Whether price changes are pushed to the channel
    pub sync_price: bool,

    /// Whether inventory changes are pushed to the channel
    pub sync_inventory: bool,

    /// Last price pushed to the channel, as a decimal string
    pub last_price: Option<String>,

    /// Last stock level pushed to the channel
    pub last_stock: Option<i32>,

    /// Timestamp when the mapping was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the mapping was last updated
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
