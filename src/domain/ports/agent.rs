//! Coding agent ports.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::domain::errors::DomainResult;
use crate::domain::models::ProcessHandle;

/// A one-shot request to the agent.
#[derive(Debug, Clone, Default)]
pub struct AgentPrompt {
    /// User prompt.
    pub prompt: String,
    /// Extra system instructions.
    pub system_prompt: Option<String>,
    /// Directory the agent runs in; the current one when `None`.
    pub working_dir: Option<PathBuf>,
}

impl AgentPrompt {
    /// Prompt with no system prompt, run in the current directory.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Run in `dir`.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Runs a prompt to completion and returns the text answer.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run `prompt` and return the agent's final answer.
    async fn run(&self, prompt: &AgentPrompt) -> DomainResult<String>;
}

/// What to launch for an assignment.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Issue being worked on.
    pub issue_number: u64,
    /// Its title, for logs.
    pub issue_title: String,
    /// Full task prompt, including the completion marker contract.
    pub prompt: String,
    /// Worktree the process starts in.
    pub worktree_path: PathBuf,
    /// Slot the run occupies, exported to the agent's environment.
    pub instance_id: String,
}

/// Starts long-running agent processes.
#[async_trait]
pub trait AgentLauncher: Send + Sync {
    /// Start the agent and hand back its process handle.
    async fn launch(&self, request: &LaunchRequest) -> DomainResult<ProcessHandle>;
}
