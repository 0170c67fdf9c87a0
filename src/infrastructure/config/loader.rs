use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::services::persona_review::persona_set;

/// Upper bound on instance slots per provider
pub const MAX_SLOTS_PER_PROVIDER: u32 = 64;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("At least one provider must be configured")]
    NoProviders,

    #[error("Provider name cannot be empty")]
    EmptyProviderName,

    #[error("Provider '{0}' is configured more than once")]
    DuplicateProvider(String),

    #[error("Invalid max_concurrent_issues for provider '{0}': {1}. Must be between 1 and 64")]
    InvalidConcurrency(String, u32),

    #[error("Branches must be distinct: '{0}' is used twice")]
    DuplicateBranch(String),

    #[error("Branch name cannot be empty")]
    EmptyBranchName,

    #[error("Invalid persona set: {0}")]
    InvalidPersonaSet(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .foreman/config.yaml
    /// 3. .foreman/local.yaml (optional overrides)
    /// 4. Environment variables (FOREMAN_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".foreman")
    }

    /// Same precedence as [`load`](Self::load), rooted at `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("FOREMAN_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file. Environment overrides still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("FOREMAN_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }
        let mut seen = HashSet::new();
        for provider in &config.providers {
            if provider.name.trim().is_empty() {
                return Err(ConfigError::EmptyProviderName);
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::DuplicateProvider(provider.name.clone()));
            }
            if provider.max_concurrent_issues == 0 || provider.max_concurrent_issues > MAX_SLOTS_PER_PROVIDER {
                return Err(ConfigError::InvalidConcurrency(
                    provider.name.clone(),
                    provider.max_concurrent_issues,
                ));
            }
        }

        let repo = &config.repository;
        let mut branches = HashSet::new();
        for branch in [&repo.main_branch, &repo.integration_branch, &repo.stage_branch] {
            if branch.trim().is_empty() {
                return Err(ConfigError::EmptyBranchName);
            }
            if !branches.insert(branch.as_str()) {
                return Err(ConfigError::DuplicateBranch(branch.clone()));
            }
        }

        if config.review.personas.is_empty() {
            persona_set(&config.review.persona_set)
                .map_err(|_| ConfigError::InvalidPersonaSet(config.review.persona_set.clone()))?;
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::ProviderConfig;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.providers[0].name, "claude");
        assert_eq!(config.database.path, ".foreman/foreman.db");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_validate_providers() {
        let mut config = Config::default();
        config.providers.clear();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::NoProviders)));

        config.providers = vec![ProviderConfig::default(), ProviderConfig::default()];
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::DuplicateProvider(name)) if name == "claude"
        ));

        config.providers = vec![ProviderConfig {
            name: "codex".to_string(),
            max_concurrent_issues: 0,
        }];
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidConcurrency(_, 0))
        ));

        config.providers[0].max_concurrent_issues = 65;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_branches_are_distinct() {
        let mut config = Config::default();
        config.repository.stage_branch = config.repository.main_branch.clone();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::DuplicateBranch(b)) if b == "main"
        ));
    }

    #[test]
    fn test_validate_logging_and_review() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogFormat(_))));

        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogLevel(_))));

        let mut config = Config::default();
        config.review.persona_set = "everyone".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidPersonaSet(_))));

        config.review.personas = vec!["qa-engineer".to_string()];
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_hierarchical_merging() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "providers:\n  - name: claude\n    max_concurrent_issues: 5\nlogging:\n  level: info\n  format: json\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("local.yaml"), "logging:\n  level: debug\n").unwrap();

        temp_env::with_vars(
            [
                ("FOREMAN_PIPELINE__AUTO_PROMOTE_TO_MAIN", Some("true")),
                ("FOREMAN_REPOSITORY__STAGE_BRANCH", Some("staging")),
            ],
            || {
                let config = ConfigLoader::load_from_dir(dir.path()).unwrap();
                assert_eq!(config.providers[0].max_concurrent_issues, 5);
                assert_eq!(config.logging.level, "debug", "local.yaml should win");
                assert_eq!(config.logging.format, "json", "base value should persist");
                assert!(config.pipeline.auto_promote_to_main, "environment should win");
                assert_eq!(config.repository.stage_branch, "staging");
            },
        );
    }

    #[test]
    fn test_load_from_missing_file() {
        assert!(ConfigLoader::load_from_file("/nonexistent/foreman.yaml").is_err());
    }

    #[test]
    fn test_load_from_file_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreman.yaml");
        std::fs::write(&path, "database:\n  path: \"\"\n").unwrap();
        let err = ConfigLoader::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Database path"));
    }
}
