//! Persona review gate.
//!
//! Each configured persona reviews the integration diff independently and
//! concurrently. Verdicts are combined by the [`ReviewPolicy`].

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Persona, PersonaVerdict, ReviewConfig, ReviewPolicy, ReviewResult};
use crate::domain::ports::{AgentPrompt, AgentRunner, PersonaReviewer, ReviewContext};

const SENIOR_ENGINEER: (&str, &str) = (
    "senior-engineer",
    "correctness, readability, error handling and fit with the existing architecture",
);
const SECURITY_REVIEWER: (&str, &str) = (
    "security-reviewer",
    "injection, secret handling, authentication and unsafe input processing",
);
const QA_ENGINEER: (&str, &str) = (
    "qa-engineer",
    "test coverage, edge cases and regressions in existing behaviour",
);
const PERFORMANCE_ENGINEER: (&str, &str) = (
    "performance-engineer",
    "algorithmic complexity, needless allocation, blocking calls and hot paths",
);
const PRODUCT_OWNER: (&str, &str) = (
    "product-owner",
    "whether the change actually delivers what the issue asks for",
);

const CATALOG: [(&str, &str); 5] = [
    SENIOR_ENGINEER,
    SECURITY_REVIEWER,
    QA_ENGINEER,
    PERFORMANCE_ENGINEER,
    PRODUCT_OWNER,
];

fn persona(entry: (&str, &str)) -> Persona {
    Persona::new(entry.0, entry.1)
}

/// Personas of a named set: `minimal` or `expanded`.
pub fn persona_set(name: &str) -> DomainResult<Vec<Persona>> {
    match name.to_lowercase().as_str() {
        "minimal" => Ok(vec![persona(SENIOR_ENGINEER)]),
        "expanded" => Ok(CATALOG.into_iter().map(persona).collect()),
        other => Err(DomainError::ValidationFailed(format!(
            "Unknown persona set '{other}' (expected minimal or expanded)"
        ))),
    }
}

/// Personas for a review config. An explicit list wins over the named set;
/// names outside the catalog get a generic focus.
pub fn resolve_personas(config: &ReviewConfig) -> DomainResult<Vec<Persona>> {
    if config.personas.is_empty() {
        return persona_set(&config.persona_set);
    }
    Ok(config
        .personas
        .iter()
        .map(|name| {
            CATALOG
                .iter()
                .find(|(n, _)| n == name)
                .map(|entry| persona(*entry))
                .unwrap_or_else(|| {
                    Persona::new(name.clone(), format!("a general review from the point of view of a {name}"))
                })
        })
        .collect())
}

/// Runs every persona over a change and aggregates the verdicts.
pub struct PersonaReviewGate {
    reviewer: Arc<dyn PersonaReviewer>,
    personas: Vec<Persona>,
    policy: ReviewPolicy,
}

impl PersonaReviewGate {
    /// Gate over an explicit persona list.
    pub fn new(reviewer: Arc<dyn PersonaReviewer>, personas: Vec<Persona>, policy: ReviewPolicy) -> Self {
        Self {
            reviewer,
            personas,
            policy,
        }
    }

    /// Gate over the configured persona set or names.
    pub fn from_config(reviewer: Arc<dyn PersonaReviewer>, config: &ReviewConfig) -> DomainResult<Self> {
        Ok(Self::new(
            reviewer,
            resolve_personas(config)?,
            ReviewPolicy::from_require_all(config.require_all_personas_pass),
        ))
    }

    /// Personas in review order.
    pub fn personas(&self) -> &[Persona] {
        &self.personas
    }

    /// Run every persona and aggregate. A reviewer error is a failing verdict.
    #[instrument(skip(self, context), fields(issue = context.issue_number, personas = self.personas.len()))]
    pub async fn review(&self, context: &ReviewContext) -> ReviewResult {
        let reviews = self.personas.iter().map(|p| async move {
            match self.reviewer.review(p, context).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(persona = %p.name, error = %e, "persona review errored");
                    PersonaVerdict::new(p.name.clone(), false, format!("review failed: {e}"))
                }
            }
        });
        let verdicts = join_all(reviews).await;
        let result = ReviewResult::aggregate(verdicts, self.policy);
        info!(
            passed = result.overall_passed,
            failures = result.failure_reasons.len(),
            "persona review finished"
        );
        result
    }
}

/// Markdown comment posted on the issue when review fails.
pub fn format_rejection(issue_ref: &str, result: &ReviewResult) -> String {
    let mut out = format!("## Review rejected for {issue_ref}\n\n");
    let failing: Vec<_> = result.failing().collect();
    if failing.is_empty() {
        for reason in &result.failure_reasons {
            out.push_str(&format!("- {reason}\n"));
        }
    } else {
        for verdict in failing {
            out.push_str(&format!("### {}\n\n{}\n\n", verdict.persona, verdict.feedback.trim()));
        }
    }
    out.push_str("\nThe assignment has been returned for rework.\n");
    out
}

static VERDICT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s*_#>-]*verdict[\s*_]*:[\s*_]*(pass|fail)\b").expect("verdict pattern is valid")
});

/// Read the `VERDICT: PASS|FAIL` line. Missing or contradictory verdicts are `None`.
pub fn parse_verdict(answer: &str) -> Option<bool> {
    let mut verdicts = VERDICT_LINE
        .captures_iter(answer)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().eq_ignore_ascii_case("pass"));
    let first = verdicts.next()?;
    if verdicts.any(|v| v != first) {
        return None;
    }
    Some(first)
}

/// [`PersonaReviewer`] that asks the coding agent to play the persona.
pub struct AgentPersonaReviewer {
    agent: Arc<dyn AgentRunner>,
}

impl AgentPersonaReviewer {
    /// Reviewer backed by `agent`.
    pub fn new(agent: Arc<dyn AgentRunner>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl PersonaReviewer for AgentPersonaReviewer {
    async fn review(&self, persona: &Persona, context: &ReviewContext) -> DomainResult<PersonaVerdict> {
        let system = format!(
            "You are a {} reviewing a change. Focus on {}. \
             End your answer with a single line `VERDICT: PASS` or `VERDICT: FAIL`.",
            persona.name, persona.focus
        );
        let prompt = format!(
            "Review the change for issue #{} ({}) from branch `{}`.\n\n```diff\n{}\n```\n",
            context.issue_number, context.issue_title, context.branch_name, context.diff
        );
        let answer = self
            .agent
            .run(&AgentPrompt::new(prompt).with_system_prompt(system))
            .await?;

        let feedback = VERDICT_LINE.replace_all(&answer, "").trim().to_string();
        let verdict = match parse_verdict(&answer) {
            Some(passed) => PersonaVerdict::new(persona.name.clone(), passed, feedback),
            None => PersonaVerdict::new(
                persona.name.clone(),
                false,
                format!("no clear VERDICT line in review. {feedback}").trim().to_string(),
            ),
        };
        Ok(verdict)
    }
}
