//! Output module for terminal reports
//!
//! This module handles:
//! - Rendering run history and scheduler status
//! - Recording archive statistics

mod history;
pub mod stats;

pub use history::{
    format_run_report, format_runs_table, format_scheduler_status, print_runs_table,
};
pub use stats::{format_statistics, load_statistics, print_statistics, ArchiveStatistics};
