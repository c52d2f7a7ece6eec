//! Terminal rendering of run history and scheduler status

use crate::crawler::{CrawlReport, SchedulerState};
use crate::storage::RunRecord;
use std::fmt::Write;

/// Renders runs as a fixed-width table, in the order given
pub fn format_runs_table(runs: &[RunRecord]) -> String {
    if runs.is_empty() {
        return "No runs recorded yet\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>6}  {:<9}  {:<8}  {:<19}  {:>6}  {:>9}",
        "RUN", "TYPE", "STATUS", "STARTED", "ITEMS", "DURATION"
    );
    for run in runs {
        let _ = writeln!(
            out,
            "{:>6}  {:<9}  {:<8}  {:<19}  {:>6}  {:>8.1}s",
            run.run_id,
            run.run_type,
            run.status,
            run.start_time.format("%Y-%m-%d %H:%M:%S"),
            run.items_count,
            run.duration_seconds
        );
        if let Some(error) = &run.error_message {
            let _ = writeln!(out, "        ! {}", error);
        }
    }
    out
}

pub fn print_runs_table(runs: &[RunRecord]) {
    print!("{}", format_runs_table(runs));
}

/// Renders the scheduler snapshot
pub fn format_scheduler_status(state: &SchedulerState) -> String {
    let next = state
        .next_run_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string());

    format!(
        "Scheduler: {} (every {}s, next run {}){}\n",
        if state.running { "armed" } else { "stopped" },
        state.interval_seconds,
        next,
        if state.run_active { ", run in progress" } else { "" }
    )
}

/// One-line summary of a finished run
pub fn format_run_report(report: &CrawlReport) -> String {
    let reason = report
        .stop_reason
        .map(|r| r.to_string())
        .unwrap_or_else(|| "did not start crawling".to_string());
    format!(
        "Run #{} {}: {} new favorite(s) from {} page(s), {:.1}s ({})\n",
        report.run.run_id,
        report.run.status,
        report.run.items_count,
        report.pages_fetched,
        report.run.duration_seconds,
        reason
    )
}
