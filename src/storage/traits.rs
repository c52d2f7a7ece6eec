//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::session::Credential;
use crate::state::{RunStatus, RunType};
use crate::storage::{FavoriteRecord, InsertOutcome, RunFinalization, RunRecord};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Run {run_id} is already finalized as {status}")]
    RunAlreadyFinalized { run_id: i64, status: RunStatus },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Archive is in use by another process ({holder}); remove {path} if it is stale")]
    InstanceLocked { path: String, holder: String },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines every database operation the ingestion pipeline needs.
/// Implementations are shared between workers behind a mutex, so they must be `Send`.
pub trait Storage: Send {
    // ===== Run History =====

    /// Creates a run record in `running` status and returns its id
    fn create_run(
        &mut self,
        run_type: RunType,
        start_time: DateTime<Utc>,
        config_hash: &str,
    ) -> StorageResult<i64>;

    /// Records where the run's log lives
    fn set_run_log_ref(&mut self, run_id: i64, log_ref: &str) -> StorageResult<()>;

    /// Updates the live item counter of a running run
    fn update_run_items(&mut self, run_id: i64, items_count: u64) -> StorageResult<()>;

    /// Moves a running run into its terminal status
    ///
    /// Fails with `RunAlreadyFinalized` if the run left `running` before.
    fn finalize_run(&mut self, run_id: i64, finalization: &RunFinalization)
        -> StorageResult<()>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Lists runs, newest first
    fn list_runs(&self, limit: Option<usize>) -> StorageResult<Vec<RunRecord>>;

    /// Gets all runs in a specific status
    fn get_runs_by_status(&self, status: RunStatus) -> StorageResult<Vec<RunRecord>>;

    /// Counts runs in a specific status
    fn count_runs_by_status(&self, status: RunStatus) -> StorageResult<u64>;

    // ===== Favorites =====

    /// Inserts a favorite unless one with the same id already exists
    ///
    /// Uniqueness is enforced by the backend, so concurrent callers can never
    /// both observe `Inserted` for one id.
    fn insert_if_absent(&mut self, record: &FavoriteRecord) -> StorageResult<InsertOutcome>;

    /// Returns true if a favorite with this id is stored
    fn contains_favorite(&self, id: &str) -> StorageResult<bool>;

    /// Loads every stored favorite id
    fn load_favorite_ids(&self) -> StorageResult<HashSet<String>>;

    /// Gets a favorite by id
    fn get_favorite(&self, id: &str) -> StorageResult<Option<FavoriteRecord>>;

    /// Gets total favorite count
    fn count_favorites(&self) -> StorageResult<u64>;

    // ===== Credential =====

    /// Replaces the stored credential
    fn save_credential(&mut self, credential: &Credential) -> StorageResult<()>;

    /// Loads the stored credential, if any
    fn load_credential(&self) -> StorageResult<Option<Credential>>;
}
