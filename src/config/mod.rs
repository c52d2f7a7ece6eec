//! Configuration module for Favorites-Keeper
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use favorites_keeper::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("keeper.toml")).unwrap();
//! println!("Crawl interval: {}s", config.scheduler.interval_seconds);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ApiConfig, Config, CredentialConfig, CrawlerConfig, OutputConfig, SchedulerConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
