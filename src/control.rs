//! Control surface consumed by the presentation layer
//!
//! Thin facade over the scheduler and run history, so callers never reach
//! into the crawler directly.

use crate::crawler::{RunRequest, Scheduler, SchedulerState};
use crate::storage::{RunRecord, Storage, StorageError};
use crate::{KeeperError, Result};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned to callers of the control surface
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("A run is already active")]
    RunActive,

    #[error("Run not found: {0}")]
    RunNotFound(i64),
}

/// Commands and queries exposed to the presentation layer
pub struct ControlSurface<S: Storage + 'static> {
    scheduler: Arc<Scheduler<S>>,
}

impl<S: Storage + 'static> ControlSurface<S> {
    pub fn new(scheduler: Arc<Scheduler<S>>) -> Self {
        Self { scheduler }
    }

    /// Starts a manual run, optionally limited to the first `page_limit` pages
    pub fn trigger_manual_run(&self, page_limit: Option<u32>) -> Result<i64> {
        self.scheduler
            .trigger_manual_run(RunRequest::manual(page_limit))
    }

    pub fn scheduler_start(&self) {
        self.scheduler.start();
    }

    pub fn scheduler_stop(&self) {
        self.scheduler.stop();
    }

    pub fn scheduler_status(&self) -> SchedulerState {
        self.scheduler.status()
    }

    /// Lists runs, newest first
    pub fn list_runs(&self, limit: Option<usize>) -> Result<Vec<RunRecord>> {
        self.scheduler.orchestrator().tracker().list_runs(limit)
    }

    /// Returns the full text of a run's log
    pub fn get_run_log(&self, run_id: i64) -> Result<String> {
        self.scheduler
            .orchestrator()
            .tracker()
            .get_run_log(run_id)
            .map_err(|e| match e {
                KeeperError::Storage(StorageError::RunNotFound(id)) => {
                    ControlError::RunNotFound(id).into()
                }
                other => other,
            })
    }
}
