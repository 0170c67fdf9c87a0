//! Issue domain model.
//!
//! Issues come from the external tracker. Their free text is turned into
//! typed relationship references by a `RelationshipParser`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Open/closed state of an issue in the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    /// Work not finished
    Open,
    /// Done or abandoned; no longer blocks dependents
    Closed,
}

impl IssueState {
    /// Lowercase name used by trackers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    /// Case-insensitive parse.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Kind of relationship one issue declares toward another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationKind {
    /// This issue cannot start until the referenced one closes
    BlockedBy,
    /// The referenced issue cannot start until this one closes
    Blocks,
    /// Informational link, no ordering
    Related,
    /// Checklist item of this issue (structural subtask)
    Subtask,
}

impl RelationKind {
    /// Kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlockedBy => "blocked-by",
            Self::Blocks => "blocks",
            Self::Related => "related",
            Self::Subtask => "subtask",
        }
    }
}

/// A typed reference from one issue to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationshipRef {
    /// How the referencing issue relates to the target.
    pub kind: RelationKind,
    /// Target issue.
    pub issue_number: u64,
}

impl RelationshipRef {
    /// Reference of `kind` to `issue_number`.
    pub fn new(kind: RelationKind, issue_number: u64) -> Self {
        Self { kind, issue_number }
    }
}

/// An issue as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Tracker issue number
    pub number: u64,
    /// Title; also carries phase tags
    pub title: String,
    /// Markdown body, scanned for relationships
    #[serde(default)]
    pub body: String,
    /// Open or closed
    pub state: IssueState,
    /// Tracker labels
    #[serde(default)]
    pub labels: Vec<String>,
    /// Parsed relationship references
    #[serde(default)]
    pub relationships: Vec<RelationshipRef>,
    /// Link to the tracker record
    #[serde(default)]
    pub url: Option<String>,
}

impl Issue {
    /// An open issue with an empty body.
    pub fn new(number: u64, title: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            body: String::new(),
            state: IssueState::Open,
            labels: Vec::new(),
            relationships: Vec::new(),
            url: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_state(mut self, state: IssueState) -> Self {
        self.state = state;
        self
    }

    pub fn with_relationship(mut self, kind: RelationKind, issue_number: u64) -> Self {
        let reference = RelationshipRef::new(kind, issue_number);
        if !self.relationships.contains(&reference) {
            self.relationships.push(reference);
        }
        self
    }

    /// Whether the issue is still open.
    pub fn is_open(&self) -> bool {
        self.state == IssueState::Open
    }

    /// Phase parsed from the title.
    pub fn phase_tag(&self) -> Option<PhaseTag> {
        PhaseTag::parse(&self.title)
    }
}

static PHASE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bphase[\s:_\-]*(\d+)(?:\.(\d+))?").expect("phase pattern is valid")
});

/// Phase number encoded in an issue title (`Phase 3`, `Phase 3.2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhaseTag {
    /// `3` in `Phase 3.2`
    pub phase: u32,
    /// `2` in `Phase 3.2`; `None` for a whole phase
    pub sub_phase: Option<u32>,
}

impl PhaseTag {
    /// First phase tag in `title`, if any.
    pub fn parse(title: &str) -> Option<Self> {
        let caps = PHASE_PATTERN.captures(title)?;
        let phase = caps.get(1)?.as_str().parse().ok()?;
        let sub_phase = caps.get(2).and_then(|m| m.as_str().parse().ok());
        Some(Self { phase, sub_phase })
    }

    /// Whether `title` names a phase master: it carries `marker` and an
    /// integral (non-decimal) phase number.
    pub fn is_master_title(title: &str, marker: &str) -> bool {
        let marker = marker.trim();
        if marker.is_empty() {
            return false;
        }
        let has_marker = title.to_uppercase().contains(&marker.to_uppercase());
        has_marker && matches!(Self::parse(title), Some(tag) if tag.sub_phase.is_none())
    }

    /// Whether this tag is a sub-item of `master`'s phase.
    pub fn is_sub_phase_of(&self, master: &PhaseTag) -> bool {
        self.sub_phase.is_some() && self.phase == master.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_tag_parsing() {
        assert_eq!(
            PhaseTag::parse("Phase 3: storage layer"),
            Some(PhaseTag { phase: 3, sub_phase: None })
        );
        assert_eq!(
            PhaseTag::parse("[phase-3.2] add index"),
            Some(PhaseTag { phase: 3, sub_phase: Some(2) })
        );
        assert_eq!(PhaseTag::parse("Refactor parser"), None);
    }

    #[test]
    fn test_master_title_requires_marker_and_integral_phase() {
        assert!(PhaseTag::is_master_title("[MASTER] Phase 4 rollout", "MASTER"));
        assert!(PhaseTag::is_master_title("Phase 4 master ticket", "master"));
        assert!(!PhaseTag::is_master_title("[MASTER] Phase 4.1 rollout", "MASTER"));
        assert!(!PhaseTag::is_master_title("Phase 4 rollout", "MASTER"));
        assert!(!PhaseTag::is_master_title("[MASTER] rollout", "MASTER"));
    }

    #[test]
    fn test_sub_phase_matching() {
        let master = PhaseTag::parse("Phase 4 MASTER").unwrap();
        assert!(PhaseTag::parse("Phase 4.1").unwrap().is_sub_phase_of(&master));
        assert!(!PhaseTag::parse("Phase 5.1").unwrap().is_sub_phase_of(&master));
        assert!(!PhaseTag::parse("Phase 4").unwrap().is_sub_phase_of(&master));
    }

    #[test]
    fn test_with_relationship_dedupes() {
        let issue = Issue::new(1, "x")
            .with_relationship(RelationKind::BlockedBy, 2)
            .with_relationship(RelationKind::BlockedBy, 2);
        assert_eq!(issue.relationships.len(), 1);
    }
}
