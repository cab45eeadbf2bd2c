//! Transient key-value cache.
//!
//! Backs sessions, in-flight auth flow state, and CSRF tokens. Two variants
//! satisfy the same contract: a process-local in-memory map and a Redis
//! client for multi-replica deployments. All entries carry a TTL; values are
//! opaque byte blobs and writes are full replacements.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::CacheConfig;

pub use memory::MemoryCache;
pub use redis::RedisCache;

/// Errors surfaced by cache operations.
///
/// `NotFound` is part of the contract (expired or never written) and is
/// distinguished from transport or backend failures.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("key not found")]
    NotFound,

    #[error("cache backend error: {0}")]
    Backend(String),
}

/// TTL'd key-value store shared by the auth flows.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch the value for `key`. Expired entries report `NotFound`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError>;

    /// Store `value` under `key`, replacing any existing entry.
    /// `ttl` must be non-zero.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Remove `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Whether a live (non-expired) entry exists for `key`.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Shut the cache down. Idempotent.
    async fn close(&self) -> Result<(), CacheError>;
}

/// Build the cache variant selected by configuration.
pub async fn new(cfg: &CacheConfig) -> anyhow::Result<std::sync::Arc<dyn Cache>> {
    match cfg.kind.as_str() {
        "memory" => Ok(std::sync::Arc::new(MemoryCache::new())),
        "redis" => {
            let redis_cfg = cfg
                .redis
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("redis config is required for redis cache type"))?;
            Ok(std::sync::Arc::new(RedisCache::connect(redis_cfg).await?))
        }
        other => anyhow::bail!("unsupported cache type: {}", other),
    }
}
