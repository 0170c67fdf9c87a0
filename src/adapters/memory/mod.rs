//! In-memory adapters, used by tests and dry runs.

mod assignment_repository;
mod issue_tracker;

pub use assignment_repository::InMemoryAssignmentRepository;
pub use issue_tracker::InMemoryIssueTracker;
