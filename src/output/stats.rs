//! Statistics about the favorites archive
//!
//! This module provides functionality for extracting and displaying
//! archive statistics from the storage layer.

use crate::state::RunStatus;
use crate::storage::{RunRecord, Storage};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Write;

/// Archive statistics summary
#[derive(Debug, Clone)]
pub struct ArchiveStatistics {
    /// Number of favorites stored
    pub total_favorites: u64,

    /// Count of runs by status
    pub runs_by_status: HashMap<RunStatus, u64>,

    /// The newest run, if any
    pub last_run: Option<RunRecord>,

    /// Whether the stored credential passed its last validation
    pub credential_valid: Option<bool>,

    pub credential_user: Option<String>,

    pub credential_checked_at: Option<DateTime<Utc>>,
}

impl ArchiveStatistics {
    pub fn total_runs(&self) -> u64 {
        self.runs_by_status.values().sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(ArchiveStatistics)` - Successfully loaded statistics
/// * `Err(KeeperError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<ArchiveStatistics> {
    let total_favorites = storage.count_favorites()?;

    let mut runs_by_status = HashMap::new();
    for status in RunStatus::all_statuses() {
        let count = storage.count_runs_by_status(status)?;
        if count > 0 {
            runs_by_status.insert(status, count);
        }
    }

    let last_run = storage.list_runs(Some(1))?.into_iter().next();
    let credential = storage.load_credential()?;

    Ok(ArchiveStatistics {
        total_favorites,
        runs_by_status,
        last_run,
        credential_valid: credential.as_ref().map(|c| c.valid),
        credential_user: credential.as_ref().and_then(|c| c.user_name.clone()),
        credential_checked_at: credential.and_then(|c| c.last_validated),
    })
}

/// Renders statistics as a human-readable report
pub fn format_statistics(stats: &ArchiveStatistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Archive Statistics ===\n");

    let _ = writeln!(out, "Overview:");
    let _ = writeln!(out, "  Favorites stored: {}", stats.total_favorites);
    let _ = writeln!(out, "  Runs recorded: {}", stats.total_runs());
    let _ = writeln!(out);

    if !stats.runs_by_status.is_empty() {
        let _ = writeln!(out, "Runs by Status:");
        let mut counts: Vec<_> = stats.runs_by_status.iter().collect();
        counts.sort_by(|a, b| {
            b.1.cmp(a.1)
                .then_with(|| a.0.to_db_string().cmp(b.0.to_db_string()))
        });

        let total = stats.total_runs();
        for (status, count) in counts {
            let percentage = (*count as f64 / total as f64) * 100.0;
            let _ = writeln!(out, "  {}: {} ({:.1}%)", status, count, percentage);
        }
        let _ = writeln!(out);
    }

    if let Some(run) = &stats.last_run {
        let _ = writeln!(
            out,
            "Last Run: #{} {} {} at {} ({} new)",
            run.run_id,
            run.run_type,
            run.status,
            run.start_time.format("%Y-%m-%d %H:%M:%S"),
            run.items_count
        );
    }

    match stats.credential_valid {
        Some(valid) => {
            let _ = writeln!(
                out,
                "Session: {}{}{}",
                if valid { "valid" } else { "invalid" },
                stats
                    .credential_user
                    .as_deref()
                    .map(|u| format!(" for {}", u))
                    .unwrap_or_default(),
                stats
                    .credential_checked_at
                    .map(|t| format!(" (checked {})", t.format("%Y-%m-%d %H:%M:%S")))
                    .unwrap_or_default()
            );
        }
        None => {
            let _ = writeln!(out, "Session: never checked");
        }
    }

    out
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &ArchiveStatistics) {
    print!("{}", format_statistics(stats));
}
