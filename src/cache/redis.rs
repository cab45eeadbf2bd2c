//! Redis cache variant.
//!
//! Delegates every operation to Redis, which gives multiple proxy replicas a
//! shared view of sessions and flow state. The connection is probed at
//! construction and every operation runs under a bounded timeout.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use super::{Cache, CacheError};
use crate::config::RedisConfig;

/// Deadline for the initial connect + liveness probe.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for individual read/write operations.
const OP_TIMEOUT: Duration = Duration::from_secs(3);

/// Cache backed by a Redis server or cluster endpoint.
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect and verify liveness with a PING.
    pub async fn connect(cfg: &RedisConfig) -> anyhow::Result<Self> {
        let url = if cfg.password.is_empty() {
            format!("redis://{}/{}", cfg.address, cfg.db)
        } else {
            format!("redis://:{}@{}/{}", urlencoding::encode(&cfg.password), cfg.address, cfg.db)
        };

        let client = redis::Client::open(url)?;

        let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow::anyhow!("timed out connecting to Redis at {}", cfg.address))??;

        let _: String = tokio::time::timeout(
            CONNECT_TIMEOUT,
            redis::cmd("PING").query_async(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis liveness probe timed out"))??;

        info!(address = %cfg.address, db = cfg.db, "connected to Redis");

        Ok(Self { conn })
    }

    async fn bounded<T>(
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(OP_TIMEOUT, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::Backend(e.to_string())),
            Err(_) => Err(CacheError::Backend("redis operation timed out".to_string())),
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = Self::bounded(conn.get(key)).await?;
        value.ok_or(CacheError::NotFound)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::Backend("ttl must be greater than zero".to_string()));
        }

        // SET EX takes whole seconds; round sub-second TTLs up so entries
        // never outlive their deadline by omission.
        let secs = ttl.as_secs().max(1);
        let mut conn = self.conn.clone();
        Self::bounded(conn.set_ex::<_, _, ()>(key, value, secs)).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        Self::bounded(conn.del::<_, ()>(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        Self::bounded(conn.exists(key)).await
    }

    async fn close(&self) -> Result<(), CacheError> {
        // The connection manager owns a multiplexed connection that closes
        // on drop; nothing to flush here.
        Ok(())
    }
}
