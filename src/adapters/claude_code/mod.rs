//! Claude Code CLI adapters.

pub mod launcher;
pub mod runner;

pub use launcher::ClaudeCodeLauncher;
pub use runner::ClaudeCodeRunner;

use crate::domain::models::AgentConfig;

/// Flags shared by one-shot and long-running invocations.
fn base_args(config: &AgentConfig, system_prompt: Option<&str>) -> Vec<String> {
    let mut args = vec!["--print".to_string()];
    if let Some(model) = &config.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        args.push("--append-system-prompt".to_string());
        args.push(system.to_string());
    }
    args.extend(config.extra_args.iter().cloned());
    args
}
