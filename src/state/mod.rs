//! State module for tracking run and crawl progress
//!
//! # Components
//!
//! - `RunStatus` / `RunType`: persisted lifecycle of a run
//! - `CrawlState` / `StopReason`: in-memory state machine of the orchestrator
//! - `CrawlMode` / `DedupBackend`: policy switches read from configuration

mod crawl_state;
mod run_status;

// Re-export main types
pub use crawl_state::{CrawlMode, CrawlState, DedupBackend, StopReason};
pub use run_status::{RunStatus, RunType};
