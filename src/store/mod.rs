//! Mapping store abstraction with per-record expiry.
//!
//! The admission layer only sees [`MappingStore`]. The backend is chosen once
//! at startup: [`memory::InMemoryMappingStore`] for a single process,
//! [`redis::RedisMappingStore`] when mappings must outlive it.

pub mod memory;
pub mod redis;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::redaction::MappingEntry;

pub use memory::InMemoryMappingStore;
pub use redis::RedisMappingStore;

/// Mapping store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No live record under the handle. Returned identically for handles
    /// that never existed and handles that expired.
    #[error("mapping not found")]
    NotFound,

    /// The backing medium refused the operation.
    #[error("mapping store unavailable: {0}")]
    Unavailable(String),

    /// A record already exists under the handle; records are immutable.
    #[error("mapping {0} already exists")]
    AlreadyExists(MappingHandle),

    /// The record could not be encoded or decoded.
    #[error("mapping serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opaque identifier returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingHandle(Uuid);

impl MappingHandle {
    /// A new random handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MappingHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MappingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MappingHandle {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unit persisted in the store. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    /// Handle the record is stored under.
    pub handle: MappingHandle,
    /// Entries in ascending offset order of the original text.
    pub entries: Vec<MappingEntry>,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
    /// Wall-clock expiry, `created_at + ttl`.
    pub expires_at: DateTime<Utc>,
}

impl MappingRecord {
    /// Build a record under a fresh handle, expiring `ttl` from now.
    pub fn new(entries: Vec<MappingEntry>, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            handle: MappingHandle::new(),
            entries,
            created_at,
            expires_at,
        }
    }

    /// Lifetime the record was built with, `expires_at - created_at`.
    ///
    /// Stores derive their deadline from this so the stamped expiry and the
    /// enforced one cannot disagree.
    pub fn ttl(&self) -> Duration {
        self.expires_at
            .signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Whether the record has passed its wall-clock expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Storage contract shared by every backend.
///
/// All methods are safe to call concurrently; implementations synchronise
/// internally and expose no lock ordering.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Persist `record` atomically until its [`ttl`](MappingRecord::ttl)
    /// elapses and return its handle.
    async fn put(&self, record: MappingRecord) -> Result<MappingHandle, StoreError>;

    /// Fetch a live record.
    async fn get(&self, handle: &MappingHandle) -> Result<MappingRecord, StoreError>;

    /// Drop expired records and return how many were reclaimed.
    async fn evict_expired(&self) -> Result<usize, StoreError>;

    /// Check that the backing medium is reachable.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Short backend label for logs.
    fn backend(&self) -> &'static str;
}
