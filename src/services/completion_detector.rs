//! Completion detection from agent output.
//!
//! Agents are asked to print explicit markers:
//!
//! ```text
//! [[FOREMAN:COMPLETE]]
//! [[FOREMAN:BLOCKED]] waiting for API credentials
//! [[FOREMAN:FAILED]] build is broken on main
//! [[FOREMAN:PR_CREATED]] #128
//! ```
//!
//! When they don't, heuristics over the most recent lines take over, but only
//! once the process has exited or gone quiet.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

use crate::domain::models::{CompletionSignal, ProcessState};

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[FOREMAN:(COMPLETE|BLOCKED|FAILED|PR_CREATED)\]\][ \t]*(.*)").expect("marker pattern is valid")
});

static PR_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#?(\d+)").expect("pr number pattern is valid"));

static PR_HEURISTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:(?:created|opened)\s+(?:a\s+|the\s+)?(?:pull\s+request|PR)\s*#(\d+))|(?:/pull/(\d+)\b)",
    )
    .expect("pr heuristic pattern is valid")
});

static FAILED_HEURISTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:fatal error|unrecoverable error|task failed|unable to complete)\b")
        .expect("failure heuristic pattern is valid")
});

static BLOCKED_HEURISTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:i am blocked|i'm blocked|blocked on|cannot proceed|need human input)\b")
        .expect("blocked heuristic pattern is valid")
});

static COMPLETE_HEURISTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:all tasks (?:are )?complete|implementation (?:is )?complete|work is complete|successfully implemented)\b",
    )
    .expect("completion heuristic pattern is valid")
});

/// Maps observed output lines to a signal.
pub trait SignalDetector: Send + Sync {
    fn detect(&self, lines: &[String]) -> Option<CompletionSignal>;
}

/// Explicit `[[FOREMAN:...]]` markers. The latest marker wins.
#[derive(Debug, Clone, Default)]
pub struct MarkerSignalDetector;

impl SignalDetector for MarkerSignalDetector {
    fn detect(&self, lines: &[String]) -> Option<CompletionSignal> {
        lines.iter().rev().find_map(|line| {
            let caps = MARKER.captures(line)?;
            let detail = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
            match caps.get(1)?.as_str() {
                "COMPLETE" => Some(CompletionSignal::Complete),
                "BLOCKED" => Some(CompletionSignal::Blocked(or_unspecified(detail))),
                "FAILED" => Some(CompletionSignal::Failed(or_unspecified(detail))),
                "PR_CREATED" => PR_NUMBER
                    .captures(&detail)
                    .and_then(|c| c.get(1)?.as_str().parse().ok())
                    .map(CompletionSignal::PullRequestCreated),
                _ => None,
            }
        })
    }
}

fn or_unspecified(reason: String) -> String {
    if reason.is_empty() {
        "no reason given".to_string()
    } else {
        reason
    }
}

/// Phrase matching over the last `window` lines, newest first.
#[derive(Debug, Clone)]
pub struct HeuristicSignalDetector {
    window: usize,
}

impl HeuristicSignalDetector {
    /// Inspect at most the last `window` lines.
    pub fn new(window: usize) -> Self {
        Self { window: window.max(1) }
    }
}

impl SignalDetector for HeuristicSignalDetector {
    fn detect(&self, lines: &[String]) -> Option<CompletionSignal> {
        let start = lines.len().saturating_sub(self.window);
        lines[start..].iter().rev().find_map(|line| {
            if let Some(caps) = PR_HEURISTIC.captures(line) {
                let number = caps.get(1).or_else(|| caps.get(2))?.as_str().parse().ok()?;
                return Some(CompletionSignal::PullRequestCreated(number));
            }
            if FAILED_HEURISTIC.is_match(line) {
                return Some(CompletionSignal::Failed(line.trim().to_string()));
            }
            if BLOCKED_HEURISTIC.is_match(line) {
                return Some(CompletionSignal::Blocked(line.trim().to_string()));
            }
            COMPLETE_HEURISTIC
                .is_match(line)
                .then_some(CompletionSignal::Complete)
        })
    }
}

/// Everything known about a run at one poll.
#[derive(Debug, Clone, Copy)]
pub struct RunObservation<'a> {
    /// Every line the run has produced so far
    pub lines: &'a [String],
    /// Process liveness
    pub state: ProcessState,
    /// Time since the last output line
    pub idle_for: Duration,
}

/// Explicit markers first, heuristics only for a silent or exited run.
pub struct CompletionDetector {
    markers: MarkerSignalDetector,
    heuristics: HeuristicSignalDetector,
    idle_threshold: Duration,
}

impl CompletionDetector {
    /// Heuristics apply once a run has been quiet for `idle_threshold`.
    pub fn new(recent_line_window: usize, idle_threshold: Duration) -> Self {
        Self {
            markers: MarkerSignalDetector,
            heuristics: HeuristicSignalDetector::new(recent_line_window),
            idle_threshold,
        }
    }

    /// `None` means keep waiting.
    pub fn evaluate(&self, observation: &RunObservation<'_>) -> Option<CompletionSignal> {
        if let Some(signal) = self.markers.detect(observation.lines) {
            return Some(signal);
        }
        match observation.state {
            ProcessState::Running => {
                if observation.idle_for >= self.idle_threshold {
                    self.heuristics.detect(observation.lines)
                } else {
                    None
                }
            }
            ProcessState::Exited { code: Some(0) } => Some(
                self.heuristics
                    .detect(observation.lines)
                    .unwrap_or(CompletionSignal::Complete),
            ),
            ProcessState::Exited { code: Some(code) } => Some(CompletionSignal::Failed(format!(
                "agent exited with status {code}"
            ))),
            ProcessState::Exited { code: None } => {
                Some(CompletionSignal::Failed("agent killed by a signal".to_string()))
            }
            ProcessState::Terminated => Some(CompletionSignal::Failed("agent terminated".to_string())),
        }
    }
}
