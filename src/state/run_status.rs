/// Run status definitions for tracking the lifecycle of a crawl execution
///
/// A run starts in `Running` and is finalized exactly once into one of the
/// terminal statuses. Terminal statuses never change again.
use serde::Serialize;
use std::fmt;

/// Represents the status of one crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The run is in progress
    Running,

    /// Completed with no page-level errors
    Success,

    /// Completed, but at least one page failed or retries were exhausted
    Warning,

    /// Authentication was rejected or the run could not start
    Failed,
}

impl RunStatus {
    /// Returns true if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Returns true if a run in this status may move to `next`
    ///
    /// Only `Running` may transition, and only into a terminal status.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(self, Self::Running) && next.is_terminal()
    }

    /// Resolves the final status from what happened during the run
    pub fn resolve(failed: bool, had_page_errors: bool) -> Self {
        if failed {
            Self::Failed
        } else if had_page_errors {
            Self::Warning
        } else {
            Self::Success
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "warning" => Some(Self::Warning),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible run statuses
    pub fn all_statuses() -> Vec<Self> {
        vec![Self::Running, Self::Success, Self::Warning, Self::Failed]
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    /// Fired by the interval timer
    Scheduled,

    /// Requested through the control surface
    Manual,
}

impl RunType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
