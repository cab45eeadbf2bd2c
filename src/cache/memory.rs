//! In-memory cache variant.
//!
//! A map guarded by a reader-writer lock. Values are copied on both set and
//! get so callers never alias stored bytes. Expiry is enforced twice: `get`
//! and `exists` check deadlines inline, and a background reclaimer sweeps
//! expired entries once a minute.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Cache, CacheError};

/// Reclaimer wake interval.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Process-local cache with TTL enforcement and a background sweeper.
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    reclaimer: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        let entries: Arc<RwLock<HashMap<String, Entry>>> = Arc::new(RwLock::new(HashMap::new()));

        let sweep_entries = Arc::clone(&entries);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let now = Instant::now();
                let mut map = match sweep_entries.write() {
                    Ok(map) => map,
                    Err(_) => return,
                };
                let before = map.len();
                map.retain(|_, entry| entry.expires_at > now);
                let evicted = before - map.len();
                drop(map);

                if evicted > 0 {
                    debug!(evicted, "memory cache sweep completed");
                }
            }
        });

        Self {
            entries,
            reclaimer: Mutex::new(Some(handle)),
        }
    }

    fn read_lock(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Entry>>, CacheError> {
        self.entries
            .read()
            .map_err(|_| CacheError::Backend("cache lock poisoned".to_string()))
    }

    fn write_lock(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>>, CacheError> {
        self.entries
            .write()
            .map_err(|_| CacheError::Backend("cache lock poisoned".to_string()))
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let map = self.read_lock()?;

        match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(entry.value.clone()),
            _ => Err(CacheError::NotFound),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::Backend("ttl must be greater than zero".to_string()));
        }

        let mut map = self.write_lock()?;
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut map = self.write_lock()?;
        map.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let map = self.read_lock()?;
        Ok(matches!(map.get(key), Some(entry) if entry.expires_at > Instant::now()))
    }

    async fn close(&self) -> Result<(), CacheError> {
        let mut reclaimer = self
            .reclaimer
            .lock()
            .map_err(|_| CacheError::Backend("reclaimer lock poisoned".to_string()))?;
        if let Some(handle) = reclaimer.take() {
            handle.abort();
        }
        Ok(())
    }
}
