//! Mock agent runner and launcher.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ProcessControl, ProcessHandle, ProcessState};
use crate::domain::ports::{AgentLauncher, AgentPrompt, AgentRunner, LaunchRequest};

/// Canned answer for [`MockAgentRunner`].
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub output: String,
    pub fail: bool,
    pub error_message: Option<String>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            output: "Mock task completed successfully.".to_string(),
            fail: false,
            error_message: None,
        }
    }
}

impl MockResponse {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            fail: true,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }
}

type Responder = Box<dyn Fn(&AgentPrompt) -> MockResponse + Send + Sync>;

/// Answers prompts from a fixed response or a closure, recording each prompt.
pub struct MockAgentRunner {
    responder: Responder,
    prompts: Mutex<Vec<AgentPrompt>>,
}

impl MockAgentRunner {
    pub fn new(response: MockResponse) -> Self {
        Self::scripted(move |_| response.clone())
    }

    pub fn scripted(responder: impl Fn(&AgentPrompt) -> MockResponse + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub async fn prompts(&self) -> Vec<AgentPrompt> {
        self.prompts.lock().await.clone()
    }
}

impl Default for MockAgentRunner {
    fn default() -> Self {
        Self::new(MockResponse::default())
    }
}

#[async_trait]
impl AgentRunner for MockAgentRunner {
    async fn run(&self, prompt: &AgentPrompt) -> DomainResult<String> {
        self.prompts.lock().await.push(prompt.clone());
        let response = (self.responder)(prompt);
        if response.fail {
            return Err(DomainError::ProcessError(
                response
                    .error_message
                    .unwrap_or_else(|| "mock agent failure".to_string()),
            ));
        }
        Ok(response.output)
    }
}

/// Hands out [`ProcessHandle`]s whose other end the test drives.
#[derive(Default)]
pub struct MockAgentLauncher {
    next_pid: AtomicU32,
    fail: AtomicBool,
    launches: Mutex<Vec<LaunchRequest>>,
    controls: Mutex<HashMap<u64, ProcessControl>>,
}

impl MockAgentLauncher {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(10_000),
            ..Default::default()
        }
    }

    /// Make subsequent launches fail.
    pub fn fail_launches(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn launches(&self) -> Vec<LaunchRequest> {
        self.launches.lock().await.clone()
    }

    /// Send an output line from the agent working on `issue_number`.
    pub async fn emit(&self, issue_number: u64, line: &str) -> bool {
        match self.controls.lock().await.get(&issue_number) {
            Some(control) => control.logs.send(line.to_string()).is_ok(),
            None => false,
        }
    }

    /// Finish the run for `issue_number` with an exit code.
    pub async fn exit(&self, issue_number: u64, code: Option<i32>) -> bool {
        match self.controls.lock().await.get(&issue_number) {
            Some(control) => control.state.send(ProcessState::Exited { code }).is_ok(),
            None => false,
        }
    }

    /// Whether termination was requested for `issue_number`. Acknowledges it
    /// by moving the run to `Terminated`.
    pub async fn was_terminated(&self, issue_number: u64) -> bool {
        let mut controls = self.controls.lock().await;
        let Some(control) = controls.get_mut(&issue_number) else {
            return false;
        };
        if control.terminate.try_recv().is_ok() {
            let _ = control.state.send(ProcessState::Terminated);
            return true;
        }
        let terminated = matches!(*control.state.borrow(), ProcessState::Terminated);
        terminated
    }
}

#[async_trait]
impl AgentLauncher for MockAgentLauncher {
    async fn launch(&self, request: &LaunchRequest) -> DomainResult<ProcessHandle> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DomainError::ProcessError("mock launch failure".to_string()));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (handle, control) = ProcessHandle::channel(pid);
        self.launches.lock().await.push(request.clone());
        self.controls.lock().await.insert(request.issue_number, control);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_runner_records_prompts() {
        let runner = MockAgentRunner::scripted(|p| MockResponse::success(p.prompt.to_uppercase()));
        assert_eq!(runner.run(&AgentPrompt::new("hi")).await.unwrap(), "HI");
        assert_eq!(runner.prompts().await.len(), 1);

        let failing = MockAgentRunner::new(MockResponse::failure("boom"));
        assert!(failing.run(&AgentPrompt::new("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_launcher_drives_handle() {
        let launcher = MockAgentLauncher::new();
        let mut handle = launcher
            .launch(&LaunchRequest {
                issue_number: 5,
                issue_title: "t".to_string(),
                prompt: "p".to_string(),
                worktree_path: PathBuf::from("/tmp"),
                instance_id: "claude-1".to_string(),
            })
            .await
            .unwrap();

        assert!(launcher.emit(5, "hello").await);
        assert_eq!(handle.drain_logs(), vec!["hello"]);
        assert!(!launcher.was_terminated(5).await);
        handle.terminate();
        assert!(launcher.was_terminated(5).await);
        assert_eq!(handle.state(), ProcessState::Terminated);
    }
}
