//! Scriptable agent and reviewer doubles for tests and dry runs.

pub mod agent;
pub mod reviewer;

pub use agent::{MockAgentLauncher, MockAgentRunner, MockResponse};
pub use reviewer::ScriptedReviewer;
