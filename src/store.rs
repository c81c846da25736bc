use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::StoreError;
use crate::models::{CanonicalJobListing, CONFLICT_KEY};

/// A table that accepts idempotent upserts of listings.
pub trait ListingStore: Send {
    /// Cheap read used once at startup to prove the store is reachable.
    fn probe(&self) -> Result<(), StoreError>;

    /// Insert-or-replace keyed on `conflict_key`. Returns the number of rows sent.
    fn upsert(&self, listings: &[CanonicalJobListing], conflict_key: &str) -> Result<usize, StoreError>;

    fn describe(&self) -> String;
}

pub fn ensure_conflict_key(conflict_key: &str) -> Result<(), StoreError> {
    if conflict_key == CONFLICT_KEY {
        Ok(())
    } else {
        Err(StoreError::UnsupportedConflictKey(conflict_key.to_string()))
    }
}

/// In-process store backing `--dry-run`. Clones share the same rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    rows: BTreeMap<String, CanonicalJobListing>,
    #[cfg(test)]
    upsert_sizes: Vec<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<CanonicalJobListing> {
        self.lock().rows.get(id).cloned()
    }

    #[cfg(test)]
    pub fn rows(&self) -> Vec<CanonicalJobListing> {
        self.lock().rows.values().cloned().collect()
    }

    /// Size of every upsert call received, in order.
    #[cfg(test)]
    pub fn upsert_sizes(&self) -> Vec<usize> {
        self.lock().upsert_sizes.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ListingStore for MemoryStore {
    fn probe(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn upsert(&self, listings: &[CanonicalJobListing], conflict_key: &str) -> Result<usize, StoreError> {
        ensure_conflict_key(conflict_key)?;
        let mut inner = self.lock();
        #[cfg(test)]
        inner.upsert_sizes.push(listings.len());
        for listing in listings {
            inner.rows.insert(listing.id.clone(), listing.clone());
        }
        Ok(listings.len())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
