//! Run lifecycle tracking
//!
//! A run is created by `RunTracker::start`, which hands out the only
//! `RunHandle` for it. Finishing consumes the handle, so each run is
//! finalized by its owner and at most once.

use crate::runs::log::{resolve_log_ref, RunLog};
use crate::state::{RunStatus, RunType};
use crate::storage::{lock_storage, RunFinalization, RunRecord, Storage, StorageError};
use crate::{KeeperError, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::Level;

/// Exclusive write access to one running run
#[derive(Debug)]
pub struct RunHandle {
    run_id: i64,
    run_type: RunType,
    start_time: DateTime<Utc>,
    log: Arc<RunLog>,
}

impl RunHandle {
    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Shared writer for the run's log, handed to workers of this run
    pub fn log(&self) -> Arc<RunLog> {
        Arc::clone(&self.log)
    }
}

/// Owns run records and run logs
pub struct RunTracker<S: Storage> {
    storage: Arc<Mutex<S>>,
    logs_dir: PathBuf,
    config_hash: String,
}

impl<S: Storage> RunTracker<S> {
    /// Creates a tracker
    ///
    /// # Arguments
    ///
    /// * `storage` - Shared storage handle
    /// * `logs_dir` - Directory under which `runs/run_<id>.log` files live
    /// * `config_hash` - Hash of the configuration, stored on every run
    pub fn new(storage: Arc<Mutex<S>>, logs_dir: impl Into<PathBuf>, config_hash: &str) -> Self {
        Self {
            storage,
            logs_dir: logs_dir.into(),
            config_hash: config_hash.to_string(),
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Opens a new run in `running` status with an empty log
    ///
    /// If the log cannot be set up, the freshly created record is finalized
    /// as `failed` before the error is returned.
    pub fn start(&self, run_type: RunType) -> Result<RunHandle> {
        let start_time = Utc::now();
        let run_id = lock_storage(&self.storage)?.create_run(
            run_type,
            start_time,
            &self.config_hash,
        )?;

        let log = match self.attach_log(run_id) {
            Ok(log) => log,
            Err(e) => {
                self.abandon(run_id, start_time, &e);
                return Err(e);
            }
        };
        log.info(&format!("Run {} started ({})", run_id, run_type));

        Ok(RunHandle {
            run_id,
            run_type,
            start_time,
            log: Arc::new(log),
        })
    }

    fn attach_log(&self, run_id: i64) -> Result<RunLog> {
        let log = RunLog::open(&self.logs_dir, run_id)?;
        lock_storage(&self.storage)?.set_run_log_ref(run_id, log.log_ref())?;
        Ok(log)
    }

    fn abandon(&self, run_id: i64, start_time: DateTime<Utc>, cause: &KeeperError) {
        let end_time = Utc::now();
        let finalization = RunFinalization {
            status: RunStatus::Failed,
            items_count: 0,
            end_time,
            duration_seconds: duration_between(start_time, end_time),
            error_message: Some(format!("run could not start: {}", cause)),
        };
        let finalized = lock_storage(&self.storage)
            .and_then(|mut storage| storage.finalize_run(run_id, &finalization));
        if let Err(e) = finalized {
            tracing::error!(run_id, "Cannot finalize run that failed to start: {}", e);
        }
    }

    /// Appends a line to the run's log
    pub fn append_log(&self, handle: &RunHandle, level: Level, line: &str) {
        handle.log.append(level, line);
    }

    /// Publishes the live item count of a running run
    pub fn update_items(&self, handle: &RunHandle, items_count: u64) -> Result<()> {
        lock_storage(&self.storage)?.update_run_items(handle.run_id, items_count)?;
        Ok(())
    }

    /// Finalizes the run and returns its terminal record
    ///
    /// # Arguments
    ///
    /// * `handle` - The run's handle, consumed
    /// * `status` - Terminal status
    /// * `items_count` - Number of newly persisted favorites
    /// * `error_message` - Reason for a failed run
    pub fn finish(
        &self,
        handle: RunHandle,
        status: RunStatus,
        items_count: u64,
        error_message: Option<String>,
    ) -> Result<RunRecord> {
        let end_time = Utc::now();
        let duration_seconds = duration_between(handle.start_time, end_time);

        let finalization = RunFinalization {
            status,
            items_count,
            end_time,
            duration_seconds,
            error_message,
        };
        lock_storage(&self.storage)?.finalize_run(handle.run_id, &finalization)?;

        let summary = format!(
            "Run {} ({}) finished: {} ({} new favorites, {:.1}s)",
            handle.run_id, handle.run_type, status, items_count, duration_seconds
        );
        match status {
            RunStatus::Failed => handle.log.error(&summary),
            RunStatus::Warning => handle.log.warn(&summary),
            _ => handle.log.info(&summary),
        }

        Ok(lock_storage(&self.storage)?.get_run(handle.run_id)?)
    }

    /// Lists runs, newest first
    pub fn list_runs(&self, limit: Option<usize>) -> Result<Vec<RunRecord>> {
        Ok(lock_storage(&self.storage)?.list_runs(limit)?)
    }

    pub fn get_run(&self, run_id: i64) -> Result<RunRecord> {
        Ok(lock_storage(&self.storage)?.get_run(run_id)?)
    }

    /// Reads back the full text of a run's log
    pub fn get_run_log(&self, run_id: i64) -> Result<String> {
        let run = self.get_run(run_id)?;
        if run.log_ref.is_empty() {
            return Ok(String::new());
        }

        let path = resolve_log_ref(&self.logs_dir, &run.log_ref);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Fails runs left in `running` by a process that exited mid-run
    ///
    /// # Returns
    ///
    /// The number of runs that were recovered
    pub fn recover_interrupted(&self) -> Result<usize> {
        let stale = lock_storage(&self.storage)?.get_runs_by_status(RunStatus::Running)?;
        let mut recovered = 0;

        for run in stale {
            let end_time = Utc::now();
            let finalization = RunFinalization {
                status: RunStatus::Failed,
                items_count: run.items_count,
                end_time,
                duration_seconds: duration_between(run.start_time, end_time),
                error_message: Some("interrupted by process exit".to_string()),
            };

            match lock_storage(&self.storage)?.finalize_run(run.run_id, &finalization) {
                Ok(()) => {}
                // Finalized concurrently; nothing left to recover
                Err(StorageError::RunAlreadyFinalized { .. }) => continue,
                Err(e) => return Err(e.into()),
            }

            let log_ref = if run.log_ref.is_empty() {
                let log_ref = crate::runs::log::log_ref_for(run.run_id);
                lock_storage(&self.storage)?.set_run_log_ref(run.run_id, &log_ref)?;
                log_ref
            } else {
                run.log_ref.clone()
            };
            match RunLog::open_ref(&self.logs_dir, run.run_id, log_ref) {
                Ok(log) => log.error("Run interrupted: process exited before it finished"),
                Err(e) => tracing::warn!(run_id = run.run_id, "Cannot open run log: {}", e),
            }
            recovered += 1;
        }

        if recovered > 0 {
            tracing::warn!("Marked {} interrupted run(s) as failed", recovered);
        }
        Ok(recovered)
    }
}

fn duration_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let millis = (end - start).num_milliseconds().max(0);
    millis as f64 / 1000.0
}
