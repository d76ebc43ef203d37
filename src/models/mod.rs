//! # Data Models
//!
//! This module contains all the data models used throughout the channel
//! sync engine.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod channel_connection;
pub mod channel_order;
pub mod inventory_sync_event;
pub mod job_run_log;
pub mod oauth_state;
pub mod product_mapping;
pub mod sync_job;

pub use channel_connection::Entity as ChannelConnection;
pub use channel_order::Entity as ChannelOrder;
pub use inventory_sync_event::Entity as InventorySyncEvent;
pub use job_run_log::Entity as JobRunLog;
pub use oauth_state::Entity as OAuthState;
pub use product_mapping::Entity as ProductMapping;
pub use sync_job::Entity as SyncJob;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "channel-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
