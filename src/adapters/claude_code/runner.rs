//! One-shot prompts through `claude --print`.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::base_args;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::AgentConfig;
use crate::domain::ports::{AgentPrompt, AgentRunner};

pub struct ClaudeCodeRunner {
    config: AgentConfig,
}

impl ClaudeCodeRunner {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AgentRunner for ClaudeCodeRunner {
    #[instrument(skip(self, prompt), fields(prompt_len = prompt.prompt.len()))]
    async fn run(&self, prompt: &AgentPrompt) -> DomainResult<String> {
        let mut args = base_args(&self.config, prompt.system_prompt.as_deref());
        args.push(prompt.prompt.clone());

        let mut cmd = Command::new(&self.config.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &prompt.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| DomainError::ProcessError(format!("Failed to spawn {}: {e}", self.config.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::ProcessError(format!(
                "{} exited with {:?}: {}",
                self.config.binary,
                output.status.code(),
                stderr.trim()
            )));
        }

        let answer = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(answer_len = answer.len(), "agent answered");
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_process_error() {
        let runner = ClaudeCodeRunner::new(AgentConfig {
            binary: "/nonexistent/claude-binary".to_string(),
            ..Default::default()
        });
        let err = runner.run(&AgentPrompt::new("hi")).await.unwrap_err();
        assert!(matches!(err, DomainError::ProcessError(_)));
    }

    #[tokio::test]
    async fn test_stdout_is_the_answer() {
        // `echo` stands in for the CLI: it prints its arguments back.
        let runner = ClaudeCodeRunner::new(AgentConfig {
            binary: "echo".to_string(),
            ..Default::default()
        });
        let answer = runner.run(&AgentPrompt::new("VERDICT: PASS")).await.unwrap();
        assert_eq!(answer, "--print VERDICT: PASS");
    }
}
