//! Issue tracker port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{FieldUpdate, Issue, TrackerRecord};

/// External issue tracker.
///
/// Field reads and writes are loosely typed; callers decode them through a
/// `FieldSchema`.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn get_issue(&self, number: u64) -> DomainResult<Issue>;

    /// Every open issue, relationships unparsed.
    async fn list_open_issues(&self) -> DomainResult<Vec<Issue>>;

    async fn post_comment(&self, number: u64, body: &str) -> DomainResult<()>;

    async fn read_fields(&self, number: u64) -> DomainResult<TrackerRecord>;

    async fn update_fields(&self, number: u64, update: &FieldUpdate) -> DomainResult<()>;
}
