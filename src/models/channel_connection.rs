//! ChannelConnection entity model
//!
//! This module contains the SeaORM entity model for the channel_connections
//! table, which stores seller-scoped links to external sales channels.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Connection status values stored in `status`.
pub mod status {
    /// OAuth flow started, waiting for the callback to land tokens
    pub const PENDING: &str = "pending";
    pub const CONNECTED: &str = "connected";
    pub const ERROR: &str = "error";
    pub const REVOKED: &str = "revoked";
}

/// ChannelConnection entity representing a seller's link to one external
/// sales channel account/store
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "channel_connections")]
pub struct Model {
    /// Unique identifier for the connection (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Seller identifier for multi-seller scoping
    pub seller_id: Uuid,

    /// Channel slug, e.g. "shopify", "amazon", "etsy"
    pub channel_type: String,

    /// Channel-side account/store identifier (unique per seller & channel)
    pub external_id: String,

    /// Display name for the connection (optional)
    pub display_name: Option<String>,

    /// Store URL for self-hosted channels (optional)
    pub store_url: Option<String>,

    /// Status of the connection (connected|error|revoked)
    pub status: String,

    /// Whether the connection participates in scheduled syncs
    pub active: bool,

    /// Encrypted access token ciphertext
    pub access_token_ciphertext: Option<Vec<u8>>,

    /// Encrypted refresh token ciphertext
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// Encrypted API key ciphertext, for key-based channels
    pub api_key_ciphertext: Option<Vec<u8>>,

    /// Access token expiration timestamp
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// OAuth scopes (optional, stored as JSON array)
    #[sea_orm(column_type = "JsonBinary")]
    pub scopes: Option<JsonValue>,

    /// Channel-specific opaque metadata
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Option<JsonValue>,

    /// Timestamp of the last successful sync for this connection
    pub last_synced_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the connection was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the connection was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sync_job::Entity")]
    SyncJob,
    #[sea_orm(has_many = "super::channel_order::Entity")]
    ChannelOrder,
    #[sea_orm(has_many = "super::product_mapping::Entity")]
    ProductMapping,
}

impl Related<super::sync_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncJob.def()
    }
}

impl Related<super::channel_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChannelOrder.def()
    }
}

impl Related<super::product_mapping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductMapping.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
