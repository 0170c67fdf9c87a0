//! Foreman - issue-to-agent work assignment
//!
//! Foreman turns open tracker issues into coding-agent runs and walks the
//! results through a staged merge pipeline:
//!
//! - issues are ordered by their dependency graph and handed to a bounded
//!   pool of agent instance slots
//! - finished work is merged onto an integration branch, reviewed by a panel
//!   of personas and pushed to a stage branch
//! - stage is optionally promoted to main
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and the ports the engine needs
//! - **Service Layer** (`services`): scheduling, registry and pipeline logic
//! - **Adapters** (`adapters`): GitHub, git, Claude Code, SQLite and in-memory ports
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): Command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Assignment, AssignmentStatus, CompletionSignal, Config, DependencyGraph, Issue, IssueState,
    NewAssignment, ReviewResult,
};
pub use domain::ports::{
    AgentLauncher, AgentRunner, AssignmentRepository, IssueTracker, PersonaReviewer,
    RelationshipParser, VersionControl,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    AssignmentRegistry, DependencyGraphAnalyzer, InstanceSlotAllocator, IntegrationPipeline,
    WorkDispatcher,
};
