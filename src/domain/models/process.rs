//! Handle to a launched agent process.
//!
//! The launcher keeps the [`ProcessControl`] half and feeds it; everything
//! above the launcher sees only the [`ProcessHandle`].

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};

/// Liveness of an agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessState {
    /// Still running
    Running,
    /// Exited on its own; `code` is `None` when killed by a signal
    Exited { code: Option<i32> },
    /// Stopped through [`ProcessHandle::terminate`]
    Terminated,
}

impl ProcessState {
    /// Not yet exited or terminated.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Exit code of a normal exit.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited { code } => *code,
            _ => None,
        }
    }
}

/// Upward-facing view of a running agent.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    logs: mpsc::UnboundedReceiver<String>,
    state: watch::Receiver<ProcessState>,
    terminate: Option<oneshot::Sender<()>>,
}

/// Launcher-side half of a [`ProcessHandle`].
#[derive(Debug)]
pub struct ProcessControl {
    /// Output lines, in order.
    pub logs: mpsc::UnboundedSender<String>,
    /// Published liveness; the last value sent is final.
    pub state: watch::Sender<ProcessState>,
    /// Fires once when the handle asks for termination.
    pub terminate: oneshot::Receiver<()>,
}

impl ProcessHandle {
    /// Create a connected handle/control pair for process `pid`.
    pub fn channel(pid: u32) -> (Self, ProcessControl) {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ProcessState::Running);
        let (term_tx, term_rx) = oneshot::channel();
        (
            Self {
                pid,
                logs: log_rx,
                state: state_rx,
                terminate: Some(term_tx),
            },
            ProcessControl {
                logs: log_tx,
                state: state_tx,
                terminate: term_rx,
            },
        )
    }

    /// OS process id; also the process group id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Latest published state.
    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// Shorthand for `state().is_running()`.
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Take every log line received since the last call.
    pub fn drain_logs(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.logs.try_recv() {
            lines.push(line);
        }
        lines
    }

    /// Wait until the process leaves `Running`.
    pub async fn wait(&mut self) -> ProcessState {
        // A dropped sender means the launcher task is gone; report the last state.
        let _ = self.state.wait_for(|s| !s.is_running()).await;
        self.state()
    }

    /// Ask the launcher to stop the process group. Returns false if already requested.
    pub fn terminate(&mut self) -> bool {
        match self.terminate.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}
