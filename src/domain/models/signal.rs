use serde::{Deserialize, Serialize};
use std::fmt;

/// What an agent run reported about its own progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "detail", rename_all = "snake_case")]
pub enum CompletionSignal {
    Complete,
    Blocked(String),
    Failed(String),
    PullRequestCreated(u64),
}

impl CompletionSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Blocked(_) => "blocked",
            Self::Failed(_) => "failed",
            Self::PullRequestCreated(_) => "pr-created",
        }
    }

    /// Blocked and failed runs end the assignment's current attempt.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Blocked(_) | Self::Failed(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Blocked(r) | Self::Failed(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Blocked(r) => write!(f, "blocked: {r}"),
            Self::Failed(r) => write!(f, "failed: {r}"),
            Self::PullRequestCreated(n) => write!(f, "pull request #{n} created"),
        }
    }
}
