//! In-process idempotency tier backed by `DashMap`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{IdempotencyError, IdempotencyRecord, IdempotencyTier};

/// `DashMap` tier with per-record expiry, checked lazily on access and
/// eagerly by [`purge_expired`](IdempotencyTier::purge_expired)
pub struct MemoryTier {
    name: &'static str,
    records: DashMap<String, IdempotencyRecord>,
}

impl MemoryTier {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IdempotencyTier for MemoryTier {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let now = Utc::now();
        if let Some(entry) = self.records.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value().clone()));
            }
        } else {
            return Ok(None);
        }
        // Shard guard is dropped above; remove_if rechecks expiry
        self.records.remove_if(key, |_, r| r.is_expired(now));
        Ok(None)
    }

    async fn put_if_absent(&self, record: IdempotencyRecord) -> Result<bool, IdempotencyError> {
        let now = Utc::now();
        match self.records.entry(record.key.clone()) {
            Entry::Occupied(mut slot) => {
                if slot.get().is_expired(now) {
                    slot.insert(record);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn put(&self, record: IdempotencyRecord) -> Result<(), IdempotencyError> {
        self.records.insert(record.key.clone(), record);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), IdempotencyError> {
        self.records.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyError> {
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_expired(now));
        Ok(before.saturating_sub(self.records.len()) as u64)
    }
}
