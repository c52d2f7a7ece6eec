use crate::state::{CrawlMode, DedupBackend};
use serde::Deserialize;

/// Main configuration structure for Favorites-Keeper
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub api: ApiConfig,
    pub scheduler: SchedulerConfig,
    pub credential: CredentialConfig,
    pub output: OutputConfig,
}

/// Crawl behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of pages in flight at once
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Whether a run stops at previously stored favorites
    #[serde(default)]
    pub mode: CrawlMode,

    /// Where "already seen" answers come from
    #[serde(default)]
    pub dedup: DedupBackend,

    /// Last page to fetch on scheduled runs (0 = unlimited)
    #[serde(rename = "page-limit", default)]
    pub page_limit: u32,

    /// Attempts per page for transient failures
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff between attempts (milliseconds), doubled per attempt
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Pause before each page dispatch (milliseconds)
    #[serde(rename = "request-delay-ms", default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Retry-exhausted pages tolerated before dispatch halts
    #[serde(rename = "max-failed-pages", default = "default_max_failed_pages")]
    pub max_failed_pages: u32,
}

/// Remote API endpoints and request identity
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Paginated favorites endpoint, `?page=<n>` is appended
    #[serde(rename = "favorites-url")]
    pub favorites_url: String,

    /// Lightweight authenticated endpoint used for session validation
    #[serde(rename = "profile-url")]
    pub profile_url: String,

    /// Base used to build a post permalink
    #[serde(rename = "post-url-base", default = "default_post_url_base")]
    pub post_url_base: String,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub referer: Option<String>,

    /// Whole-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Interval scheduling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(rename = "interval-seconds", default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Arm the scheduler as soon as the daemon starts
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

/// Where the login collaborator leaves the session cookies
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    #[serde(rename = "cookie-path")]
    pub cookie_path: String,

    /// Profile uid passed to the validation endpoint
    #[serde(default)]
    pub uid: Option<String>,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory holding per-run log files
    #[serde(rename = "logs-dir")]
    pub logs_dir: String,
}

impl CrawlerConfig {
    /// Page limit as an option, with 0 meaning unlimited
    pub fn page_limit(&self) -> Option<u32> {
        (self.page_limit > 0).then_some(self.page_limit)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            mode: CrawlMode::default(),
            dedup: DedupBackend::default(),
            page_limit: 0,
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            request_delay_ms: default_request_delay_ms(),
            max_failed_pages: default_max_failed_pages(),
        }
    }
}

fn default_workers() -> u32 {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_request_delay_ms() -> u64 {
    2000
}

fn default_max_failed_pages() -> u32 {
    3
}

fn default_post_url_base() -> String {
    "https://weibo.com".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_interval_seconds() -> u64 {
    3600
}

fn default_autostart() -> bool {
    true
}
