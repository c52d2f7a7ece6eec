//! Deduplication backends
//!
//! Both backends answer "was this id stored before?" The storage backend asks
//! the database every time; the snapshot backend loads every stored id once
//! when the run starts. Neither replaces the uniqueness check done by the
//! insert itself.

use crate::storage::{lock_storage, FavoriteRecord, Storage, StorageError, StorageResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Decides whether a record is new relative to storage
pub trait Deduplicator: Send + Sync {
    fn is_new(&self, record: &FavoriteRecord) -> StorageResult<bool>;

    /// Notes that a record is now stored
    fn mark_seen(&self, record: &FavoriteRecord) -> StorageResult<()>;
}

/// Looks each id up in storage
pub struct StorageDeduplicator<S: Storage> {
    storage: Arc<Mutex<S>>,
}

impl<S: Storage> StorageDeduplicator<S> {
    pub fn new(storage: Arc<Mutex<S>>) -> Self {
        Self { storage }
    }
}

impl<S: Storage> Deduplicator for StorageDeduplicator<S> {
    fn is_new(&self, record: &FavoriteRecord) -> StorageResult<bool> {
        let storage = lock_storage(&self.storage)?;
        Ok(!storage.contains_favorite(&record.id)?)
    }

    fn mark_seen(&self, _record: &FavoriteRecord) -> StorageResult<()> {
        // The stored row is the mark
        Ok(())
    }
}

/// Answers from a set of ids taken when the run starts
pub struct SnapshotDeduplicator {
    seen: Mutex<HashSet<String>>,
}

impl SnapshotDeduplicator {
    /// Takes a snapshot of every stored id
    pub fn from_storage<S: Storage>(storage: &Mutex<S>) -> StorageResult<Self> {
        let ids = lock_storage(storage)?.load_favorite_ids()?;
        Ok(Self::from_ids(ids))
    }

    pub fn from_ids(ids: HashSet<String>) -> Self {
        Self {
            seen: Mutex::new(ids),
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Deduplicator for SnapshotDeduplicator {
    fn is_new(&self, record: &FavoriteRecord) -> StorageResult<bool> {
        let seen = self.seen.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(!seen.contains(&record.id))
    }

    fn mark_seen(&self, record: &FavoriteRecord) -> StorageResult<()> {
        let mut seen = self.seen.lock().map_err(|_| StorageError::LockPoisoned)?;
        seen.insert(record.id.clone());
        Ok(())
    }
}
