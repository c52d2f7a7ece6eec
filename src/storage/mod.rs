//! Storage module for persisting the favorites archive
//!
//! This module handles all database operations for the keeper, including:
//! - SQLite database initialization and schema management
//! - Favorite persistence with id-based deduplication
//! - Run history tracking
//! - The stored session credential

mod lock;
mod schema;
mod sqlite;
mod traits;

pub use lock::InstanceLock;
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::{RunStatus, RunType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    SqliteStorage::new(path)
}

/// Locks a shared storage handle, mapping a poisoned lock to a storage error
pub fn lock_storage<S: Storage>(storage: &Mutex<S>) -> StorageResult<MutexGuard<'_, S>> {
    storage.lock().map_err(|_| StorageError::LockPoisoned)
}

/// One favorited post in normalized form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FavoriteRecord {
    /// Remote post id, unique across the archive
    pub id: String,
    /// Short post id used in permalinks
    pub mblogid: String,
    /// Post creation time as `YYYY-MM-DD HH:MM:SS` in the poster's offset,
    /// or the raw remote value when it cannot be parsed
    pub created_at: String,
    /// When this record was written locally
    pub collected_at: DateTime<Utc>,
    pub url: String,
    pub user_id: String,
    pub user_name: String,
    /// Plain text body
    pub text: String,
    /// Rich (markup) body
    pub text_html: String,
    pub is_long_text: bool,
    /// Long links embedded in the post, in source order
    pub links: Vec<String>,
    /// Client the post was published from
    pub source: String,
}

/// Outcome of an insert-if-absent write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was new and has been stored
    Inserted,
    /// A record with the same id was already stored
    Duplicate,
}

/// Represents one crawl run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: i64,
    pub run_type: RunType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub items_count: u64,
    pub duration_seconds: f64,
    /// Path of the run's log file
    pub log_ref: String,
    pub error_message: Option<String>,
    pub config_hash: String,
}

/// Terminal values written when a run is finalized
#[derive(Debug, Clone)]
pub struct RunFinalization {
    pub status: RunStatus,
    pub items_count: u64,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub error_message: Option<String>,
}
