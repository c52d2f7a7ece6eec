//! Crawler module for the favorites ingestion pipeline
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching of favorites pages with retry logic
//! - Normalization of raw items into favorite records
//! - Deduplication against stored favorites
//! - Bounded-concurrency orchestration of one run
//! - Interval scheduling of runs

mod dedup;
mod fetcher;
mod normalizer;
mod orchestrator;
mod scheduler;

pub use dedup::{Deduplicator, SnapshotDeduplicator, StorageDeduplicator};
pub use fetcher::{
    build_http_client, decode_page, fetch_with_retry, FetchError, HttpPageFetcher, PageFetcher,
    RawPage, RetryPolicy,
};
pub use normalizer::{normalize, RawItem, RawLink, RawUser, DEFAULT_TEXT};
pub use orchestrator::{CrawlOrchestrator, CrawlReport, CrawlSettings, RunRequest};
pub use scheduler::{RunGate, RunGuard, Scheduler, SchedulerState, TickOutcome};
