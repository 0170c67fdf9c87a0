use serde::{Deserialize, Serialize};

/// Main configuration structure for Foreman
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Worker types and their concurrency limits
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    /// Git repository layout
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Integration pipeline behaviour
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Persona review gate
    #[serde(default)]
    pub review: ReviewConfig,

    /// Issue tracker connection and field schema
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Coding agent invocation
    #[serde(default)]
    pub agent: AgentConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![ProviderConfig::default()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            repository: RepositoryConfig::default(),
            pipeline: PipelineConfig::default(),
            review: ReviewConfig::default(),
            tracker: TrackerConfig::default(),
            agent: AgentConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Provider section named `name`.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// First configured provider, used when the CLI is given none.
    pub fn default_provider(&self) -> Option<&ProviderConfig> {
        self.providers.first()
    }
}

/// One worker type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProviderConfig {
    /// Prefix of instance ids, e.g. `claude` in `claude-2`
    pub name: String,

    /// Number of instance slots (1-64)
    #[serde(default = "default_max_concurrent_issues")]
    pub max_concurrent_issues: u32,
}

const fn default_max_concurrent_issues() -> u32 {
    3
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "claude".to_string(),
            max_concurrent_issues: default_max_concurrent_issues(),
        }
    }
}

/// Repository and branch layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RepositoryConfig {
    /// Path to the working copy the pipeline operates on
    #[serde(default = "default_repo_path")]
    pub path: String,

    /// Branch promoted work lands on
    #[serde(default = "default_main_branch")]
    pub main_branch: String,

    /// Scratch branch rebuilt from main for every merge attempt
    #[serde(default = "default_integration_branch")]
    pub integration_branch: String,

    /// Holds the last integration that passed review
    #[serde(default = "default_stage_branch")]
    pub stage_branch: String,

    /// Remote to fetch from and push to; local-only when unset
    #[serde(default)]
    pub remote: Option<String>,

    /// Directory holding one worktree per assignment
    #[serde(default = "default_worktree_root")]
    pub worktree_root: String,

    /// Feature branches are named `{branch_prefix}{issue_number}`
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

fn default_repo_path() -> String {
    ".".to_string()
}

fn default_main_branch() -> String {
    "main".to_string()
}

fn default_integration_branch() -> String {
    "foreman/integration".to_string()
}

fn default_stage_branch() -> String {
    "stage".to_string()
}

fn default_worktree_root() -> String {
    ".foreman/worktrees".to_string()
}

fn default_branch_prefix() -> String {
    "foreman/issue-".to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: default_repo_path(),
            main_branch: default_main_branch(),
            integration_branch: default_integration_branch(),
            stage_branch: default_stage_branch(),
            remote: None,
            worktree_root: default_worktree_root(),
            branch_prefix: default_branch_prefix(),
        }
    }
}

impl RepositoryConfig {
    /// Feature branch for an issue.
    pub fn branch_for_issue(&self, issue_number: u64) -> String {
        format!("{}{}", self.branch_prefix, issue_number)
    }

    /// Worktree directory for an issue.
    pub fn worktree_for_issue(&self, issue_number: u64) -> String {
        format!("{}/issue-{}", self.worktree_root.trim_end_matches('/'), issue_number)
    }
}

/// Integration pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Hand merge conflicts to the agent instead of rejecting
    #[serde(default = "default_true")]
    pub auto_resolve_conflicts: bool,

    /// Merge stage into main after a passing review
    #[serde(default)]
    pub auto_promote_to_main: bool,

    /// Only process phase master issues
    #[serde(default)]
    pub phase_mode: bool,

    /// Title marker of a phase master, matched case-insensitively
    #[serde(default = "default_phase_master_marker")]
    pub phase_master_marker: String,

    /// Tracker status written on rejection instead of `assigned`
    #[serde(default)]
    pub rejection_status_label: Option<String>,

    /// Prefix of the tag placed on each stage push
    #[serde(default = "default_tag_prefix")]
    pub tag_prefix: String,
}

const fn default_true() -> bool {
    true
}

fn default_phase_master_marker() -> String {
    "MASTER".to_string()
}

fn default_tag_prefix() -> String {
    "stage-".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_resolve_conflicts: true,
            auto_promote_to_main: false,
            phase_mode: false,
            phase_master_marker: default_phase_master_marker(),
            rejection_status_label: None,
            tag_prefix: default_tag_prefix(),
        }
    }
}

/// Persona review configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReviewConfig {
    /// `minimal` or `expanded`; ignored when `personas` is non-empty
    #[serde(default = "default_persona_set")]
    pub persona_set: String,

    /// Explicit persona names
    #[serde(default)]
    pub personas: Vec<String>,

    /// Every persona must pass; otherwise a majority suffices
    #[serde(default = "default_true")]
    pub require_all_personas_pass: bool,
}

fn default_persona_set() -> String {
    "minimal".to_string()
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            persona_set: default_persona_set(),
            personas: vec![],
            require_all_personas_pass: true,
        }
    }
}

/// Issue tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrackerConfig {
    /// Repository owner (user or organization)
    #[serde(default)]
    pub owner: String,

    /// Repository name
    #[serde(default)]
    pub repo: String,

    /// Environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// API base URL (for testing/proxies)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,

    /// Tracker field that mirrors assignment status
    #[serde(default = "default_status_field")]
    pub status_field: String,

    /// Tracker field naming the instance working on the issue
    #[serde(default = "default_instance_field")]
    pub instance_field: String,
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_status_field() -> String {
    "status".to_string()
}

fn default_instance_field() -> String {
    "instance".to_string()
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            token_env: default_token_env(),
            api_base: None,
            status_field: default_status_field(),
            instance_field: default_instance_field(),
        }
    }
}

/// Coding agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Path to claude CLI executable
    #[serde(default = "default_claude_path")]
    pub binary: String,

    /// Model passed with `--model`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Appended to every agent invocation
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Where agent run logs are written
    #[serde(default = "default_agent_log_dir")]
    pub log_dir: String,

    /// Seconds without output before heuristic completion detection applies
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Number of trailing log lines the heuristics inspect
    #[serde(default = "default_recent_lines")]
    pub recent_line_window: usize,
}

fn default_claude_path() -> String {
    "claude".to_string()
}

fn default_agent_log_dir() -> String {
    ".foreman/logs/agents".to_string()
}

const fn default_idle_timeout() -> u64 {
    300
}

const fn default_recent_lines() -> usize {
    40
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: default_claude_path(),
            model: None,
            extra_args: vec![],
            log_dir: default_agent_log_dir(),
            idle_timeout_secs: default_idle_timeout(),
            recent_line_window: default_recent_lines(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".foreman/foreman.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Rotation for file logs: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_name_distinct_branches() {
        let config = Config::default();
        let repo = &config.repository;
        assert_ne!(repo.main_branch, repo.integration_branch);
        assert_ne!(repo.main_branch, repo.stage_branch);
        assert_eq!(config.providers.len(), 1);
        assert!(config.review.require_all_personas_pass);
    }

    #[test]
    fn test_issue_naming() {
        let repo = RepositoryConfig {
            worktree_root: "/tmp/wt/".to_string(),
            ..Default::default()
        };
        assert_eq!(repo.branch_for_issue(42), "foreman/issue-42");
        assert_eq!(repo.worktree_for_issue(42), "/tmp/wt/issue-42");
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "pipeline:\n  auto_promote_to_main: true\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.pipeline.auto_promote_to_main);
        assert!(config.pipeline.auto_resolve_conflicts);
        assert_eq!(config.pipeline.tag_prefix, "stage-");
    }
}
