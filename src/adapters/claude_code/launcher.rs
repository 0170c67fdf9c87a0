//! Long-running agent processes.
//!
//! Each agent runs in its own process group inside the assignment's
//! worktree. Output lines go to the [`ProcessHandle`] and to a per-issue log
//! file; termination signals the whole group.

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

use super::base_args;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentConfig, ProcessControl, ProcessHandle, ProcessState};
use crate::domain::ports::{AgentLauncher, LaunchRequest};

/// Time between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(10);

/// How long to wait for output pipes to drain after exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ClaudeCodeLauncher {
    config: AgentConfig,
}

impl ClaudeCodeLauncher {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    fn log_path(&self, issue_number: u64) -> PathBuf {
        PathBuf::from(&self.config.log_dir).join(format!("issue-{issue_number}.log"))
    }
}

#[async_trait]
impl AgentLauncher for ClaudeCodeLauncher {
    #[instrument(skip(self, request), fields(issue = request.issue_number, instance = %request.instance_id))]
    async fn launch(&self, request: &LaunchRequest) -> DomainResult<ProcessHandle> {
        let log_path = self.log_path(request.issue_number);
        if let Some(dir) = log_path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DomainError::ProcessError(format!("Failed to create {}: {e}", dir.display())))?;
        }
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .map_err(|e| DomainError::ProcessError(format!("Failed to open {}: {e}", log_path.display())))?;

        let mut args = base_args(&self.config, None);
        args.push(request.prompt.clone());

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .current_dir(&request.worktree_path)
            .env("FOREMAN_ISSUE", request.issue_number.to_string())
            .env("FOREMAN_INSTANCE", &request.instance_id)
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DomainError::ProcessError(format!("Failed to spawn {}: {e}", self.config.binary)))?;

        let pid = child
            .id()
            .ok_or_else(|| DomainError::ProcessError("agent exited before reporting a pid".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DomainError::ProcessError("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DomainError::ProcessError("Failed to capture stderr".to_string()))?;

        let (handle, control) = ProcessHandle::channel(pid);
        tokio::spawn(supervise(child, pid, stdout, stderr, Arc::new(Mutex::new(log_file)), control));

        info!(pid, log = %log_path.display(), "agent process started");
        Ok(handle)
    }
}

/// Pump output, wait for exit or a terminate request, then publish the final state.
async fn supervise(
    mut child: Child,
    pid: u32,
    stdout: impl AsyncRead + Unpin + Send + 'static,
    stderr: impl AsyncRead + Unpin + Send + 'static,
    log_file: Arc<Mutex<File>>,
    control: ProcessControl,
) {
    let ProcessControl {
        logs,
        state,
        mut terminate,
    } = control;

    let pumps = [
        tokio::spawn(pump(stdout, logs.clone(), log_file.clone())),
        tokio::spawn(pump(stderr, logs, log_file)),
    ];

    let final_state = tokio::select! {
        status = child.wait() => ProcessState::Exited {
            code: status.ok().and_then(|s| s.code()),
        },
        Ok(()) = &mut terminate => {
            stop_group(pid, &mut child).await;
            ProcessState::Terminated
        }
    };

    if tokio::time::timeout(DRAIN_TIMEOUT, futures::future::join_all(pumps))
        .await
        .is_err()
    {
        warn!(pid, "agent output still open after exit");
    }
    debug!(pid, state = ?final_state, "agent process finished");
    let _ = state.send(final_state);
}

async fn pump(
    reader: impl AsyncRead + Unpin,
    logs: mpsc::UnboundedSender<String>,
    log_file: Arc<Mutex<File>>,
) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        {
            let mut file = log_file.lock().await;
            // tokio's File writes in the background until flushed.
            let written = match file.write_all(format!("{line}\n").as_bytes()).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                warn!(error = %e, "failed to write agent log");
            }
        }
        // The handle may be gone; keep draining so the child never blocks on a full pipe.
        let _ = logs.send(line);
    }
}

fn signal_group(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), signal) {
        debug!(pid, signal = ?signal, error = %e, "signal to process group failed");
    }
}

/// SIGTERM the group, then SIGKILL it if it outlives the grace period.
async fn stop_group(pid: u32, child: &mut Child) {
    signal_group(pid, Signal::SIGTERM);
    if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_err() {
        warn!(pid, "agent ignored SIGTERM, killing process group");
        signal_group(pid, Signal::SIGKILL);
        let _ = child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &std::path::Path, prompt: &str) -> LaunchRequest {
        LaunchRequest {
            issue_number: 12,
            issue_title: "Test".to_string(),
            prompt: prompt.to_string(),
            worktree_path: dir.to_path_buf(),
            instance_id: "claude-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_output_reaches_handle_and_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ClaudeCodeLauncher::new(AgentConfig {
            binary: "echo".to_string(),
            log_dir: dir.path().join("logs").to_string_lossy().to_string(),
            ..Default::default()
        });

        let mut handle = launcher.launch(&request(dir.path(), "[[FOREMAN:COMPLETE]]")).await.unwrap();
        assert_eq!(handle.wait().await, ProcessState::Exited { code: Some(0) });
        assert_eq!(handle.drain_logs(), vec!["--print [[FOREMAN:COMPLETE]]"]);

        let log = std::fs::read_to_string(dir.path().join("logs/issue-12.log")).unwrap();
        assert!(log.contains("[[FOREMAN:COMPLETE]]"));
    }

    #[tokio::test]
    async fn test_log_file_holds_every_line_once_run_exits() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("agent.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nfor i in $(seq 1 200); do echo \"step $i\"; done\necho '[[FOREMAN:COMPLETE]]'\n",
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let launcher = ClaudeCodeLauncher::new(AgentConfig {
            binary: script.to_string_lossy().to_string(),
            log_dir: dir.path().join("logs").to_string_lossy().to_string(),
            ..Default::default()
        });

        let mut handle = launcher.launch(&request(dir.path(), "work")).await.unwrap();
        assert_eq!(handle.wait().await, ProcessState::Exited { code: Some(0) });

        let log = std::fs::read_to_string(dir.path().join("logs/issue-12.log")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 201);
        assert_eq!(lines[0], "step 1");
        assert_eq!(lines[200], "[[FOREMAN:COMPLETE]]");
    }

    #[tokio::test]
    async fn test_terminate_stops_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("agent.sh");
        std::fs::write(&script, "#!/bin/sh\necho started\nsleep 30\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let launcher = ClaudeCodeLauncher::new(AgentConfig {
            binary: script.to_string_lossy().to_string(),
            log_dir: dir.path().join("logs").to_string_lossy().to_string(),
            ..Default::default()
        });

        let mut handle = launcher.launch(&request(dir.path(), "work")).await.unwrap();
        assert!(handle.terminate());
        assert_eq!(handle.wait().await, ProcessState::Terminated);
    }
}
