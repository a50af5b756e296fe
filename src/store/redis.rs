//! Redis-backed mapping store.
//!
//! Each record is one JSON string under `<namespace>:<handle>`, written with
//! `SET .. PX <ttl> NX` so the write is atomic, never overwrites, and expiry
//! is enforced by Redis itself.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::{MappingHandle, MappingRecord, MappingStore, StoreError};

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "redact_mappings";

/// Networked store delegating expiry to Redis.
#[derive(Clone)]
pub struct RedisMappingStore {
    manager: ConnectionManager,
    namespace: String,
}

impl RedisMappingStore {
    /// Connect to `url` and verify the server answers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let manager = ConnectionManager::new(client).await.map_err(unavailable)?;
        let store = Self {
            manager,
            namespace: namespace.into(),
        };
        store.ping().await?;
        Ok(store)
    }

    fn key(&self, handle: &MappingHandle) -> String {
        format!("{}:{handle}", self.namespace)
    }
}

impl std::fmt::Debug for RedisMappingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisMappingStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn encode(record: &MappingRecord) -> Result<String, StoreError> {
    Ok(serde_json::to_string(record)?)
}

/// A missing key is an expired or unknown handle.
fn decode(payload: Option<&str>) -> Result<MappingRecord, StoreError> {
    let payload = payload.ok_or(StoreError::NotFound)?;
    Ok(serde_json::from_str(payload)?)
}

/// Redis rejects `PX 0`, so sub-millisecond TTLs round up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl MappingStore for RedisMappingStore {
    async fn put(&self, record: MappingRecord) -> Result<MappingHandle, StoreError> {
        let handle = record.handle;
        let ttl = record.ttl();
        let payload = encode(&record)?;
        let mut conn = self.manager.clone();
        let written: Option<String> = redis::cmd("SET")
            .arg(self.key(&handle))
            .arg(payload)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        match written {
            Some(_) => Ok(handle),
            None => Err(StoreError::AlreadyExists(handle)),
        }
    }

    async fn get(&self, handle: &MappingHandle) -> Result<MappingRecord, StoreError> {
        let mut conn = self.manager.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(self.key(handle))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        decode(payload.as_deref())
    }

    async fn evict_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
