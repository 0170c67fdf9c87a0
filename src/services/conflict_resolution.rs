//! Agent-driven merge conflict resolution.
//!
//! Each conflicted file is sent to the agent with a fixed resolution policy;
//! the answer must be the complete file with no conflict markers left. The
//! first file that cannot be resolved fails the whole resolution and the
//! caller aborts the merge.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{AgentPrompt, AgentRunner, VersionControl};

const CONFLICT_MARKERS: [&str; 3] = ["<<<<<<<", "=======", ">>>>>>>"];

const RESOLUTION_SYSTEM_PROMPT: &str = "You resolve git merge conflicts. \
Combine both sides additively whenever they can coexist. \
When the sides genuinely override each other, prefer the feature branch. \
Preserve every import and dependency from both sides. \
Respond with the complete resolved file and nothing else.";

/// What is being merged, for the prompt and commit messages.
#[derive(Debug, Clone)]
pub struct ConflictContext {
    /// Branch being merged in.
    pub source_branch: String,
    /// Branch being merged into.
    pub target_branch: String,
    /// `#n` of the issue behind the merge.
    pub issue_ref: String,
}

/// Asks the agent to rewrite conflicted files, then stages them.
pub struct ConflictResolutionService {
    agent: Arc<dyn AgentRunner>,
    vcs: Arc<dyn VersionControl>,
}

impl ConflictResolutionService {
    pub fn new(agent: Arc<dyn AgentRunner>, vcs: Arc<dyn VersionControl>) -> Self {
        Self { agent, vcs }
    }

    /// Resolve and stage every file in `files`. Returns the files resolved.
    #[instrument(skip(self, files), fields(source = %context.source_branch, files = files.len()))]
    pub async fn resolve(&self, files: &[String], context: &ConflictContext) -> DomainResult<Vec<String>> {
        let mut resolved = Vec::with_capacity(files.len());
        for file in files {
            if let Err(e) = self.resolve_file(file, context).await {
                warn!(file = %file, error = %e, "conflict resolution failed");
                return Err(e);
            }
            resolved.push(file.clone());
        }
        info!(count = resolved.len(), "conflicts resolved");
        Ok(resolved)
    }

    async fn resolve_file(&self, file: &str, context: &ConflictContext) -> DomainResult<()> {
        let fail = |reason: String| DomainError::ConflictResolutionFailed {
            file: file.to_string(),
            reason,
        };

        let content = self.vcs.read_file(file).await.map_err(|e| fail(e.to_string()))?;
        let prompt = AgentPrompt::new(build_resolution_prompt(file, &content, context))
            .with_system_prompt(RESOLUTION_SYSTEM_PROMPT);
        let answer = self.agent.run(&prompt).await.map_err(|e| fail(e.to_string()))?;

        let mut merged = strip_code_fence(&answer).to_string();
        validate_resolution(&merged).map_err(fail)?;
        if content.ends_with('\n') && !merged.ends_with('\n') {
            merged.push('\n');
        }

        self.vcs.write_file(file, &merged).await?;
        self.vcs.stage(file).await?;
        Ok(())
    }
}

fn build_resolution_prompt(file: &str, content: &str, context: &ConflictContext) -> String {
    format!(
        "Resolve the merge conflicts in `{file}`.\n\n\
         Merging `{source}` ({issue}) into `{target}`; the feature branch is `{source}`.\n\n\
         Rules:\n\
         1. Keep changes from both sides when they can coexist.\n\
         2. On a genuine override, prefer the `{source}` side.\n\
         3. Keep all imports and dependency declarations from both sides.\n\
         4. Output the complete file only, without commentary.\n\n\
         ```\n{content}\n```\n",
        source = context.source_branch,
        issue = context.issue_ref,
        target = context.target_branch,
    )
}

/// Drop one enclosing markdown code fence, if the whole answer is fenced.
pub fn strip_code_fence(answer: &str) -> &str {
    let trimmed = answer.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return answer;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return answer;
    };
    // Skip the info string (`rust`, `ts`, ...) on the opening line.
    match body.split_once('\n') {
        Some((_, code)) => code.strip_suffix('\n').unwrap_or(code),
        None => "",
    }
}

/// A resolution must be non-empty and free of conflict markers.
pub fn validate_resolution(content: &str) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("agent returned an empty file".to_string());
    }
    if let Some(marker) = CONFLICT_MARKERS.iter().find(|m| content.contains(*m)) {
        return Err(format!("resolution still contains conflict marker '{marker}'"));
    }
    Ok(())
}
