//! Assignment repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Assignment, AssignmentStatus};

/// Repository interface for Assignment persistence.
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// Insert a new assignment.
    async fn create(&self, assignment: &Assignment) -> DomainResult<()>;

    /// Get an assignment by ID.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Assignment>>;

    /// Get the active (non-merged) assignment for an issue.
    async fn get_active_by_issue(&self, issue_number: u64) -> DomainResult<Option<Assignment>>;

    /// Overwrite an existing assignment.
    async fn update(&self, assignment: &Assignment) -> DomainResult<()>;

    /// List assignments in a status, ordered by issue number.
    async fn list_by_status(&self, status: AssignmentStatus) -> DomainResult<Vec<Assignment>>;

    /// List every assignment, ordered by issue number.
    async fn list_all(&self) -> DomainResult<Vec<Assignment>>;
}
