//! [`IssueTracker`] over GitHub Issues.
//!
//! Tracker fields are stored as `{field}:{value}` labels, so `status:in-progress`
//! and `instance:claude-2` live next to the issue's ordinary labels.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use super::client::GitHubClient;
use super::models::GitHubIssue;
use crate::domain::errors::DomainResult;
use crate::domain::models::{FieldUpdate, Issue, IssueState, TrackerConfig, TrackerRecord};
use crate::domain::ports::IssueTracker;

const FIELD_SEPARATOR: char = ':';

pub struct GitHubIssueTracker {
    client: GitHubClient,
}

impl GitHubIssueTracker {
    pub fn new(client: GitHubClient) -> Self {
        Self { client }
    }

    /// Build from tracker config, reading the token from its environment variable.
    pub fn from_config(config: &TrackerConfig) -> DomainResult<Self> {
        let mut client = GitHubClient::from_env(&config.token_env, &config.owner, &config.repo)?;
        if let Some(base) = &config.api_base {
            client = client.with_api_base(base);
        }
        Ok(Self::new(client))
    }
}

fn to_issue(raw: GitHubIssue) -> Issue {
    let state = IssueState::from_str(&raw.state).unwrap_or(IssueState::Open);
    let labels = raw.label_names();
    let mut issue = Issue::new(raw.number, raw.title)
        .with_body(raw.body.unwrap_or_default())
        .with_state(state);
    issue.labels = labels;
    issue.url = Some(raw.html_url);
    issue
}

/// Split a `{field}:{value}` label.
fn field_label(label: &str) -> Option<(&str, &str)> {
    let (name, value) = label.split_once(FIELD_SEPARATOR)?;
    let (name, value) = (name.trim(), value.trim());
    (!name.is_empty() && !value.is_empty()).then_some((name, value))
}

/// Labels as tracker fields. Later labels win for a repeated field.
pub fn fields_from_labels(labels: &[String]) -> BTreeMap<String, Option<String>> {
    labels
        .iter()
        .filter_map(|l| field_label(l))
        .map(|(name, value)| (name.to_string(), Some(value.to_string())))
        .collect()
}

/// Apply `update` to a label set: drop every label of an updated field, then
/// add the new values. Other labels are kept in order.
pub fn apply_field_update(labels: &[String], update: &FieldUpdate) -> Vec<String> {
    let mut out: Vec<String> = labels
        .iter()
        .filter(|l| !matches!(field_label(l), Some((name, _)) if update.fields.contains_key(name)))
        .cloned()
        .collect();
    for (name, value) in &update.fields {
        if let Some(value) = value {
            out.push(format!("{name}{FIELD_SEPARATOR}{value}"));
        }
    }
    out
}

#[async_trait]
impl IssueTracker for GitHubIssueTracker {
    async fn get_issue(&self, number: u64) -> DomainResult<Issue> {
        self.client.get_issue(number).await.map(to_issue)
    }

    #[instrument(skip(self))]
    async fn list_open_issues(&self) -> DomainResult<Vec<Issue>> {
        let raw = self.client.list_issues("open").await?;
        let issues: Vec<Issue> = raw
            .into_iter()
            .filter(|i| !i.is_pull_request())
            .map(to_issue)
            .collect();
        debug!(count = issues.len(), "open issues fetched");
        Ok(issues)
    }

    async fn post_comment(&self, number: u64, body: &str) -> DomainResult<()> {
        self.client.post_comment(number, body).await
    }

    async fn read_fields(&self, number: u64) -> DomainResult<TrackerRecord> {
        let issue = self.client.get_issue(number).await?;
        Ok(TrackerRecord {
            issue_number: number,
            fields: fields_from_labels(&issue.label_names()),
        })
    }

    async fn update_fields(&self, number: u64, update: &FieldUpdate) -> DomainResult<()> {
        if update.is_empty() {
            return Ok(());
        }
        let current = self.client.get_issue(number).await?.label_names();
        let labels = apply_field_update(&current, update);
        if labels == current {
            return Ok(());
        }
        self.client.set_labels(number, labels).await
    }
}
