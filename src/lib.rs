//! Favorites-Keeper: an unattended backup of saved social-media posts
//!
//! This crate implements the ingestion pipeline that repeatedly paginates a
//! remote favorites API, normalizes each post into a stable record, persists
//! only new records, and tracks the health of every run on a schedule.

pub mod config;
pub mod control;
pub mod crawler;
pub mod output;
pub mod runs;
pub mod session;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Favorites-Keeper operations
#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Credential error: {0}")]
    Credential(#[from] session::CredentialError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Control error: {0}")]
    Control(#[from] control::ControlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Favorites-Keeper operations
pub type Result<T> = std::result::Result<T, KeeperError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlOrchestrator, Scheduler};
pub use runs::RunTracker;
pub use state::{CrawlMode, RunStatus, RunType};
pub use storage::{FavoriteRecord, RunRecord, SqliteStorage};
