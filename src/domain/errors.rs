//! Domain errors for the Foreman orchestration engine.

use thiserror::Error;
use uuid::Uuid;

/// Format a cycle path as a human-readable string: `#1 -> #2 -> #1`.
fn format_cycle_path(path: &[u64]) -> String {
    path.iter()
        .map(|n| format!("#{n}"))
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Domain-level errors that can occur while scheduling and integrating work.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Malformed input such as unparseable relationship text or a bad branch name.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Issue dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<u64>),

    /// No free instance slot; callers retry later, nothing is queued.
    #[error("No free instance slot for provider '{provider}' (max {max_slots})")]
    ResourceExhausted { provider: String, max_slots: u32 },

    #[error("Merge conflict merging '{branch}' in: {}", .files.join(", "))]
    MergeConflict { branch: String, files: Vec<String> },

    #[error("Conflict resolution failed for {file}: {reason}")]
    ConflictResolutionFailed { file: String, reason: String },

    #[error("Review rejected: {0}")]
    ReviewRejected(String),

    #[error("{service} error: {message}")]
    ExternalService { service: String, message: String },

    /// The coding agent failed to launch or exited abnormally.
    #[error("Process error: {0}")]
    ProcessError(String),

    #[error("Version control error: {0}")]
    VersionControl(String),

    #[error("Assignment not found: {0}")]
    AssignmentNotFound(Uuid),

    #[error("Issue #{0} already has an active assignment")]
    DuplicateAssignment(u64),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Shorthand for a tracker/API failure.
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether the pipeline can recover from this error without an operator.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MergeConflict { .. } | Self::ReviewRejected(_) | Self::ResourceExhausted { .. }
        )
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message() {
        let err = DomainError::DependencyCycle(vec![10, 11, 10]);
        assert_eq!(
            err.to_string(),
            "Issue dependency cycle detected: #10 -> #11 -> #10"
        );
    }

    #[test]
    fn test_resource_exhausted_message() {
        let err = DomainError::ResourceExhausted {
            provider: "claude".to_string(),
            max_slots: 1,
        };
        assert!(err.to_string().contains("'claude'"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_merge_conflict_lists_files() {
        let err = DomainError::MergeConflict {
            branch: "foreman/issue-7".to_string(),
            files: vec!["a.rs".to_string(), "b.rs".to_string()],
        };
        assert!(err.to_string().ends_with("a.rs, b.rs"));
    }

    #[test]
    fn test_process_error_not_recoverable() {
        assert!(!DomainError::ProcessError("exit 1".to_string()).is_recoverable());
    }
}
