//! Wiring of configuration, persistence and adapters for one CLI invocation.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::claude_code::{ClaudeCodeLauncher, ClaudeCodeRunner};
use crate::adapters::git::GitCli;
use crate::adapters::github::GitHubIssueTracker;
use crate::adapters::sqlite::{database_url, initialize_database, PoolConfig, SqliteAssignmentRepository};
use crate::domain::models::{Config, FieldSchema};
use crate::domain::ports::{AgentRunner, AssignmentRepository, IssueTracker, VersionControl};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{
    AgentPersonaReviewer, AssignmentRegistry, CompletionDetector, ConflictResolutionService,
    InstanceSlotAllocator, IntegrationPipeline, PersonaReviewGate, RegexRelationshipParser,
    StageBranchConfig, StageBranchController, WorkDispatcher,
};

/// Load configuration from `--config` when given, otherwise from `.foreman/`.
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Config plus the opened assignment database. Services are built on demand.
pub struct AppContext {
    /// Loaded configuration.
    pub config: Config,
    /// SQLite-backed assignment store.
    pub repository: Arc<dyn AssignmentRepository>,
}

impl AppContext {
    /// Open and migrate the database named in `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let url = database_url(&config.database.path);
        let pool = initialize_database(
            &url,
            PoolConfig {
                max_connections: config.database.max_connections,
                ..PoolConfig::default()
            },
        )
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.path))?;
        let repository: Arc<dyn AssignmentRepository> = Arc::new(SqliteAssignmentRepository::new(pool));
        Ok(Self {
            config,
            repository,
        })
    }

    /// Provider named on the command line, or the first configured one.
    pub fn provider(&self, requested: Option<&str>) -> Result<String> {
        let provider = match requested {
            Some(name) => self
                .config
                .provider(name)
                .with_context(|| format!("Provider '{name}' is not configured"))?,
            None => self
                .config
                .default_provider()
                .context("No providers configured")?,
        };
        Ok(provider.name.clone())
    }

    pub fn repo_path(&self) -> PathBuf {
        PathBuf::from(&self.config.repository.path)
    }

    /// GitHub tracker built from the tracker section.
    pub fn tracker(&self) -> Result<Arc<dyn IssueTracker>> {
        let tracker = GitHubIssueTracker::from_config(&self.config.tracker).with_context(|| {
            format!(
                "Failed to configure the issue tracker (is {} set?)",
                self.config.tracker.token_env
            )
        })?;
        Ok(Arc::new(tracker))
    }

    pub fn vcs(&self) -> Arc<dyn VersionControl> {
        Arc::new(GitCli::new(self.repo_path()))
    }

    pub fn agent_runner(&self) -> Arc<dyn AgentRunner> {
        Arc::new(ClaudeCodeRunner::new(self.config.agent.clone()))
    }

    /// Registry with live claims restored from persisted assignments.
    pub async fn registry(&self, tracker: Arc<dyn IssueTracker>) -> Result<Arc<AssignmentRegistry>> {
        let schema = FieldSchema::new(
            self.config.tracker.status_field.clone(),
            self.config.tracker.instance_field.clone(),
        );
        let registry = AssignmentRegistry::new(
            self.repository.clone(),
            tracker,
            InstanceSlotAllocator::new(&self.config.providers),
            schema,
        )
        .with_rejection_status_label(self.config.pipeline.rejection_status_label.clone());
        let restored = registry
            .restore_claims()
            .await
            .context("Failed to restore slot claims")?;
        tracing::debug!(restored, "slot claims restored");
        Ok(Arc::new(registry))
    }

    pub fn pipeline(
        &self,
        registry: Arc<AssignmentRegistry>,
        tracker: Arc<dyn IssueTracker>,
    ) -> Result<IntegrationPipeline> {
        let vcs = self.vcs();
        let agent = self.agent_runner();
        let stage = StageBranchController::new(
            vcs.clone(),
            StageBranchConfig::from_config(&self.config.repository, &self.config.pipeline),
        )
        .context("Invalid branch configuration")?;
        let resolver = ConflictResolutionService::new(agent.clone(), vcs);
        let review_gate = PersonaReviewGate::from_config(
            Arc::new(AgentPersonaReviewer::new(agent)),
            &self.config.review,
        )
        .context("Invalid review configuration")?;
        Ok(IntegrationPipeline::new(
            registry,
            stage,
            resolver,
            review_gate,
            tracker,
            self.config.pipeline.clone(),
        ))
    }

    /// Dispatcher wired to the configured agent launcher and repository.
    pub fn dispatcher(&self, registry: Arc<AssignmentRegistry>, tracker: Arc<dyn IssueTracker>) -> WorkDispatcher {
        let agent = &self.config.agent;
        WorkDispatcher::new(
            registry,
            tracker,
            Arc::new(RegexRelationshipParser::new()),
            self.vcs(),
            Arc::new(ClaudeCodeLauncher::new(agent.clone())),
            CompletionDetector::new(agent.recent_line_window, Duration::from_secs(agent.idle_timeout_secs)),
            self.config.repository.clone(),
            self.config.pipeline.phase_master_marker.clone(),
        )
    }
}
