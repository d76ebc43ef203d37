//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM operations
//! for database entities, providing a clean API for data access with seller-aware methods.

pub mod channel_order;
pub mod connection;
pub mod inventory_event;
pub mod job_run_log;
pub mod oauth_state;
pub mod product_mapping;
pub mod sync_job;
pub mod sync_metadata;

pub use channel_order::ChannelOrderRepository;
pub use connection::ConnectionRepository;
pub use inventory_event::InventoryEventRepository;
pub use job_run_log::JobRunLogRepository;
pub use oauth_state::OAuthStateRepository;
pub use product_mapping::ProductMappingRepository;
pub use sync_job::SyncJobRepository;
