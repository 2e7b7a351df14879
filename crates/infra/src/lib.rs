//! Infrastructure layer: stores, caches, upstream adapter, config, and the
//! two pipelines built on them.
//!
//! - `sync`: status read path (cache-aside read + transition detection + outbox enqueue)
//! - `outbox`: periodic worker delivering outbox entries to an idempotent handler

pub mod cache;
pub mod config;
pub mod outbox;
pub mod store;
pub mod sync;
pub mod upstream;

pub use config::{AppConfig, ConfigError, OutboxConfig, PersistenceConfig, SyncConfig};
pub use sync::{StatusResponse, StatusSyncService, SyncError};
