use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{FieldUpdate, Issue, TrackerRecord};
use crate::domain::ports::IssueTracker;

#[derive(Debug, Default)]
struct TrackerState {
    issues: BTreeMap<u64, Issue>,
    fields: HashMap<u64, BTreeMap<String, Option<String>>>,
    comments: HashMap<u64, Vec<String>>,
    fail_field_updates: bool,
}

/// Tracker kept in memory. Field writes are accepted for any issue number.
#[derive(Debug, Default)]
pub struct InMemoryIssueTracker {
    state: RwLock<TrackerState>,
}

impl InMemoryIssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_issue(&self, issue: Issue) {
        self.state.write().await.issues.insert(issue.number, issue);
    }

    pub async fn comments(&self, number: u64) -> Vec<String> {
        self.state
            .read()
            .await
            .comments
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn fields(&self, number: u64) -> BTreeMap<String, Option<String>> {
        self.state
            .read()
            .await
            .fields
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    /// Make `update_fields` fail, to exercise best-effort mirroring.
    pub async fn fail_field_updates(&self, fail: bool) {
        self.state.write().await.fail_field_updates = fail;
    }
}

#[async_trait]
impl IssueTracker for InMemoryIssueTracker {
    async fn get_issue(&self, number: u64) -> DomainResult<Issue> {
        self.state
            .read()
            .await
            .issues
            .get(&number)
            .cloned()
            .ok_or_else(|| DomainError::external("tracker", format!("issue #{number} not found")))
    }

    async fn list_open_issues(&self) -> DomainResult<Vec<Issue>> {
        Ok(self
            .state
            .read()
            .await
            .issues
            .values()
            .filter(|i| i.is_open())
            .cloned()
            .collect())
    }

    async fn post_comment(&self, number: u64, body: &str) -> DomainResult<()> {
        self.state
            .write()
            .await
            .comments
            .entry(number)
            .or_default()
            .push(body.to_string());
        Ok(())
    }

    async fn read_fields(&self, number: u64) -> DomainResult<TrackerRecord> {
        Ok(TrackerRecord {
            issue_number: number,
            fields: self.fields(number).await,
        })
    }

    async fn update_fields(&self, number: u64, update: &FieldUpdate) -> DomainResult<()> {
        let mut state = self.state.write().await;
        if state.fail_field_updates {
            return Err(DomainError::external("tracker", "field updates disabled"));
        }
        let fields = state.fields.entry(number).or_default();
        for (name, value) in &update.fields {
            fields.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}
