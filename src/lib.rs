//! # Channel Sync Library
//!
//! Core functionality for the channel synchronization service: channel
//! adapters, the sync job queue and worker, webhook ingestion,
//! encrypted credential storage, and the HTTP API.

pub mod adapters;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod cursor;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod sync_executor;
pub mod telemetry;
pub mod token_refresh;
pub mod webhook_verification;
pub use migration;
