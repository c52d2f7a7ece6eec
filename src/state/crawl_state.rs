//! Orchestrator state machine and crawl policy switches

use serde::Deserialize;
use std::fmt;

/// Lifecycle of one orchestrated crawl: `Idle -> Running -> {Completed, Stopped, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    Running,
    /// Pagination ran out of data
    Completed,
    /// A stop condition ended the crawl before the data ran out
    Stopped,
    /// Authentication was rejected or the crawl could not begin
    Failed,
}

impl CrawlState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    pub fn can_transition_to(&self, next: CrawlState) -> bool {
        match self {
            Self::Idle => matches!(next, Self::Running | Self::Failed),
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }

    /// Moves to `next`, or `None` if the transition is not allowed
    pub fn advance(self, next: CrawlState) -> Option<CrawlState> {
        self.can_transition_to(next).then_some(next)
    }
}

/// Why dispatch of further pages ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An empty page was returned
    Exhausted,
    /// The requested page limit was reached
    PageLimit,
    /// Incremental mode met favorites stored by an earlier run
    CaughtUp,
    /// A page body did not match the expected schema
    MalformedPage,
    /// Too many pages exhausted their retries
    FailureBudget,
    /// The remote service rejected the credential
    AuthRejected,
}

impl StopReason {
    /// The terminal crawl state this reason leads to
    pub fn terminal_state(&self) -> CrawlState {
        match self {
            Self::Exhausted => CrawlState::Completed,
            Self::AuthRejected => CrawlState::Failed,
            Self::PageLimit | Self::CaughtUp | Self::MalformedPage | Self::FailureBudget => {
                CrawlState::Stopped
            }
        }
    }

    /// Returns true if this reason by itself marks the run as degraded
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::MalformedPage | Self::FailureBudget)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Exhausted => "no more favorites",
            Self::PageLimit => "page limit reached",
            Self::CaughtUp => "caught up with stored favorites",
            Self::MalformedPage => "malformed page",
            Self::FailureBudget => "too many failed pages",
            Self::AuthRejected => "credential rejected",
        };
        f.write_str(label)
    }
}

/// Crawl termination policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrawlMode {
    /// Stop once favorites stored by an earlier run show up
    #[default]
    Incremental,
    /// Walk every page until the remote service runs out
    FullScan,
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incremental => f.write_str("incremental"),
            Self::FullScan => f.write_str("full-scan"),
        }
    }
}

/// Source of "already seen" answers during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupBackend {
    /// Look each id up in storage
    #[default]
    Storage,
    /// Load every stored id into memory when the run starts
    Snapshot,
}
