//! Short-TTL cache for assembled status responses.
//!
//! The cache is best-effort: callers treat every `CacheError` as a miss (on
//! read) or ignore it (on write/delete).

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use refundsync_core::UserId;

pub use memory::InMemoryStatusCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisStatusCache;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Key of the latest-status entry for a user (`refund:latest:{userId}`).
pub fn status_cache_key(user_id: UserId) -> String {
    format!("refund:latest:{user_id}")
}

#[async_trait]
pub trait StatusCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}
