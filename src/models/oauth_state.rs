//! # OAuth State Model
//!
//! This module contains the OAuth state entity for storing OAuth flow state tokens.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OAuth State entity for storing OAuth flow state tokens
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth_states")]
pub struct Model {
    /// Primary key UUID
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Seller that owns this OAuth state
    pub seller_id: Uuid,

    /// Channel slug the flow targets (e.g. "shopify", "etsy")
    pub channel_type: String,

    /// State token generated for CSRF protection
    pub state: String,

    /// Redirect URI registered for the flow (optional)
    pub redirect_uri: Option<String>,

    /// Expiration timestamp
    pub expires_at: DateTimeWithTimeZone,

    /// When the state was created
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// OAuth state lookup for callback validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthStateLookup {
    /// Seller that owns the state
    pub seller_id: Uuid,
    /// Channel slug the flow targets
    pub channel_type: String,
    /// State token value
    pub state: String,
    /// Redirect URI registered for the flow
    pub redirect_uri: Option<String>,
}

impl From<Model> for OAuthStateLookup {
    fn from(model: Model) -> Self {
        Self {
            seller_id: model.seller_id,
            channel_type: model.channel_type,
            state: model.state,
            redirect_uri: model.redirect_uri,
        }
    }
}
