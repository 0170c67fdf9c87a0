//! Persona review domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named reviewer perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Stable identifier, e.g. `security-reviewer`
    pub name: String,
    /// What this persona looks for; fed into the review prompt
    pub focus: String,
}

impl Persona {
    /// Persona with a name and a focus description.
    pub fn new(name: impl Into<String>, focus: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            focus: focus.into(),
        }
    }
}

/// One persona's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaVerdict {
    /// Persona name
    pub persona: String,
    /// Whether the persona approves
    pub passed: bool,
    /// Reviewer text, quoted back on rejection
    pub feedback: String,
    /// When the verdict was produced
    pub reviewed_at: DateTime<Utc>,
}

impl PersonaVerdict {
    /// Verdict stamped with the current time.
    pub fn new(persona: impl Into<String>, passed: bool, feedback: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            passed,
            feedback: feedback.into(),
            reviewed_at: Utc::now(),
        }
    }
}

/// How individual verdicts combine into an overall result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPolicy {
    /// Every persona must pass
    RequireAll,
    /// Strictly more than half must pass
    Majority,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self::RequireAll
    }
}

impl ReviewPolicy {
    /// `RequireAll` when `require_all`, else `Majority`.
    pub fn from_require_all(require_all: bool) -> Self {
        if require_all {
            Self::RequireAll
        } else {
            Self::Majority
        }
    }

    /// Whether `verdicts` pass under this policy. No verdicts never pass.
    pub fn passes(&self, verdicts: &[PersonaVerdict]) -> bool {
        if verdicts.is_empty() {
            return false;
        }
        match self {
            Self::RequireAll => verdicts.iter().all(|v| v.passed),
            Self::Majority => verdicts.iter().filter(|v| v.passed).count() * 2 > verdicts.len(),
        }
    }
}

/// Aggregated outcome of a review round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewResult {
    /// Verdicts in persona order
    pub verdicts: Vec<PersonaVerdict>,
    /// Verdicts pass under the configured policy
    pub overall_passed: bool,
    /// `persona: feedback` for every failing persona, populated on failure
    pub failure_reasons: Vec<String>,
}

impl ReviewResult {
    /// Combine verdicts under `policy`.
    pub fn aggregate(verdicts: Vec<PersonaVerdict>, policy: ReviewPolicy) -> Self {
        let overall_passed = policy.passes(&verdicts);
        let failure_reasons = if overall_passed {
            Vec::new()
        } else if verdicts.is_empty() {
            vec!["no personas produced a verdict".to_string()]
        } else {
            verdicts
                .iter()
                .filter(|v| !v.passed)
                .map(|v| format!("{}: {}", v.persona, v.feedback))
                .collect()
        };
        Self {
            verdicts,
            overall_passed,
            failure_reasons,
        }
    }

    /// Verdicts that did not pass.
    pub fn failing(&self) -> impl Iterator<Item = &PersonaVerdict> {
        self.verdicts.iter().filter(|v| !v.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_all_fails_on_single_failure() {
        let result = ReviewResult::aggregate(
            vec![
                PersonaVerdict::new("senior-engineer", true, "looks good"),
                PersonaVerdict::new("security-reviewer", false, "token logged in plain text"),
            ],
            ReviewPolicy::RequireAll,
        );
        assert!(!result.overall_passed);
        assert_eq!(result.failure_reasons.len(), 1);
        assert!(result.failure_reasons[0].contains("token logged in plain text"));
    }

    #[test]
    fn test_majority_tolerates_minority_failure() {
        let verdicts = vec![
            PersonaVerdict::new("a", true, ""),
            PersonaVerdict::new("b", true, ""),
            PersonaVerdict::new("c", false, "nit"),
        ];
        let result = ReviewResult::aggregate(verdicts, ReviewPolicy::Majority);
        assert!(result.overall_passed);
        assert!(result.failure_reasons.is_empty());
    }

    #[test]
    fn test_majority_tie_fails() {
        let verdicts = vec![
            PersonaVerdict::new("a", true, ""),
            PersonaVerdict::new("b", false, "no"),
        ];
        assert!(!ReviewPolicy::Majority.passes(&verdicts));
    }

    #[test]
    fn test_empty_review_never_passes() {
        let result = ReviewResult::aggregate(vec![], ReviewPolicy::RequireAll);
        assert!(!result.overall_passed);
        assert_eq!(result.failure_reasons.len(), 1);
    }
}
