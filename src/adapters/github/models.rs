//! GitHub REST API payloads used by the tracker adapter.
//!
//! Only the fields the adapter reads are declared; serde ignores the rest.

use serde::{Deserialize, Serialize};

/// An issue returned by the GitHub API.
///
/// Issues and pull requests share the endpoint; pull requests carry a
/// non-null `pull_request` field and are skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubIssue {
    /// Number within the repository, as in "#42".
    pub number: u64,
    /// Issue title.
    pub title: String,
    /// Markdown body; absent or null on empty issues.
    #[serde(default)]
    pub body: Option<String>,
    /// "open" or "closed"
    pub state: String,
    /// Labels currently applied. Status and instance fields live here.
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    /// Present only when the item is a pull request.
    #[serde(default)]
    pub pull_request: Option<GitHubPullRequestRef>,
    /// Browser URL, stored as the assignment's external link.
    pub html_url: String,
}

impl GitHubIssue {
    /// Whether this item is a pull request rather than an issue.
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    /// Label names in API order.
    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.name.clone()).collect()
    }
}

/// A label applied to an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubLabel {
    /// Label name, e.g. "bug" or "status:in-progress".
    pub name: String,
}

/// Marker object present on pull requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubPullRequestRef {
    /// API URL of the pull request.
    pub url: String,
}

/// Request body for posting an issue comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubCommentRequest {
    /// Markdown comment text.
    pub body: String,
}

/// Replaces the full label set of an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSetLabelsRequest {
    /// Every label the issue should carry afterwards.
    pub labels: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_deserialization() {
        let json = r#"{
            "id": 1,
            "number": 42,
            "title": "Fix login bug",
            "body": "Blocked by #40",
            "state": "open",
            "labels": [{ "name": "status:in-progress", "color": "d73a4a" }],
            "pull_request": null,
            "html_url": "https://github.com/org/repo/issues/42"
        }"#;
        let issue: GitHubIssue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.number, 42);
        assert_eq!(issue.label_names(), vec!["status:in-progress"]);
        assert!(!issue.is_pull_request());
    }

    #[test]
    fn test_minimal_issue_deserialization() {
        let json = r#"{
            "number": 1,
            "title": "Minimal",
            "state": "closed",
            "html_url": "https://github.com/org/repo/issues/1"
        }"#;
        let issue: GitHubIssue = serde_json::from_str(json).unwrap();
        assert!(issue.body.is_none());
        assert!(issue.labels.is_empty());
    }
}
