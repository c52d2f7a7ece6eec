//! Run history: lifecycle of each crawl execution and its log

mod log;
mod tracker;

pub use log::{log_ref_for, RunLog};
pub use tracker::{RunHandle, RunTracker};
