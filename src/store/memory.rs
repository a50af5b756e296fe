//! In-process mapping store.
//!
//! Records live in a sharded [`DashMap`] so unrelated requests never contend
//! on one lock. Expiry is tracked on the tokio monotonic clock: an expired
//! record is invisible to [`get`](MappingStore::get) immediately and is
//! physically removed on the next lookup or eviction sweep.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{MappingHandle, MappingRecord, MappingStore, StoreError};

#[derive(Debug)]
struct StoredRecord {
    record: MappingRecord,
    deadline: Instant,
}

/// Concurrent in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryMappingStore {
    records: DashMap<MappingHandle, StoredRecord>,
}

impl InMemoryMappingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records physically held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are held.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn put(&self, record: MappingRecord) -> Result<MappingHandle, StoreError> {
        let ttl = record.ttl();
        let deadline = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| StoreError::Unavailable(format!("ttl {ttl:?} out of range")))?;
        let handle = record.handle;
        match self.records.entry(handle) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(handle)),
            Entry::Vacant(slot) => {
                slot.insert(StoredRecord { record, deadline });
                Ok(handle)
            }
        }
    }

    async fn get(&self, handle: &MappingHandle) -> Result<MappingRecord, StoreError> {
        let now = Instant::now();
        // The shard guard must be released before `remove_if` touches the
        // same shard.
        let live = self
            .records
            .get(handle)
            .map(|stored| (now < stored.deadline).then(|| stored.record.clone()));
        match live {
            Some(Some(record)) => Ok(record),
            Some(None) => {
                self.records
                    .remove_if(handle, |_, stored| stored.deadline <= now);
                Err(StoreError::NotFound)
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn evict_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut evicted = 0usize;
        self.records.retain(|_, stored| {
            let live = now < stored.deadline;
            if !live {
                evicted = evicted.saturating_add(1);
            }
            live
        });
        Ok(evicted)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
