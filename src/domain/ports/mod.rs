//! Port trait definitions (Hexagonal Architecture)
//!
//! Adapters implement these to connect the engine to the outside world:
//! - AssignmentRepository: assignment persistence
//! - IssueTracker: issues, comments and status fields
//! - VersionControl: the git working copy
//! - AgentRunner / AgentLauncher: the coding agent
//! - RelationshipParser: issue text to typed references
//! - PersonaReviewer: one review verdict per persona

pub mod agent;
pub mod assignment_repository;
pub mod issue_tracker;
pub mod relationship_parser;
pub mod reviewer;
pub mod version_control;

pub use agent::{AgentLauncher, AgentPrompt, AgentRunner, LaunchRequest};
pub use assignment_repository::AssignmentRepository;
pub use issue_tracker::IssueTracker;
pub use relationship_parser::{RelationshipParse, RelationshipParser};
pub use reviewer::{PersonaReviewer, ReviewContext};
pub use version_control::{MergeOutcome, VersionControl};
