//! Per-run plain-text log files
//!
//! Every run writes `<logs-dir>/runs/run_<id>.log`. Lines have the form
//! `<rfc3339 timestamp> <LEVEL> <message>` and are mirrored to `tracing`.

use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Level;

/// Path of a run's log relative to the logs directory
pub fn log_ref_for(run_id: i64) -> String {
    format!("runs/run_{}.log", run_id)
}

/// Resolves a stored log reference against the logs directory
pub fn resolve_log_ref(logs_dir: &Path, log_ref: &str) -> PathBuf {
    logs_dir.join(log_ref)
}

/// Append-only log of one run
pub struct RunLog {
    run_id: i64,
    log_ref: String,
    path: PathBuf,
    file: Mutex<File>,
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLog")
            .field("run_id", &self.run_id)
            .field("log_ref", &self.log_ref)
            .finish()
    }
}

impl RunLog {
    /// Opens (or creates) the log file of a run
    pub fn open(logs_dir: &Path, run_id: i64) -> std::io::Result<Self> {
        Self::open_ref(logs_dir, run_id, log_ref_for(run_id))
    }

    /// Opens the log file behind an existing log reference
    pub fn open_ref(logs_dir: &Path, run_id: i64, log_ref: String) -> std::io::Result<Self> {
        let path = resolve_log_ref(logs_dir, &log_ref);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            run_id,
            log_ref,
            path,
            file: Mutex::new(file),
        })
    }

    pub fn log_ref(&self) -> &str {
        &self.log_ref
    }

    /// Appends one line and emits the matching tracing event
    ///
    /// A failed write is reported through tracing and otherwise ignored, so a
    /// full disk never changes the outcome of a run.
    pub fn append(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(run_id = self.run_id, "{}", message),
            Level::WARN => tracing::warn!(run_id = self.run_id, "{}", message),
            Level::INFO => tracing::info!(run_id = self.run_id, "{}", message),
            Level::DEBUG => tracing::debug!(run_id = self.run_id, "{}", message),
            Level::TRACE => tracing::trace!(run_id = self.run_id, "{}", message),
        }

        let line = format!("{} {} {}\n", Utc::now().to_rfc3339(), level, message);
        let written = match self.file.lock() {
            Ok(mut file) => file.write_all(line.as_bytes()),
            Err(_) => Ok(()),
        };
        if let Err(e) = written {
            tracing::warn!(
                run_id = self.run_id,
                "Failed to write run log {}: {}",
                self.path.display(),
                e
            );
        }
    }

    pub fn info(&self, message: &str) {
        self.append(Level::INFO, message);
    }

    pub fn warn(&self, message: &str) {
        self.append(Level::WARN, message);
    }

    pub fn error(&self, message: &str) {
        self.append(Level::ERROR, message);
    }
}
