//! GitHub HTTP client with rate limiting.
//!
//! Wraps the handful of REST v3 endpoints the tracker needs. A token bucket
//! keeps requests under the 5 000 req/hour authenticated limit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};

use super::models::{GitHubCommentRequest, GitHubIssue, GitHubSetLabelsRequest};

pub const GITHUB_API_BASE: &str = "https://api.github.com";

const PER_PAGE: usize = 100;

/// Token-bucket rate limiter: `capacity` requests per `window`.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    tokens: u32,
    window: Duration,
    window_start: Instant,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            tokens: capacity,
            window,
            window_start: Instant::now(),
        }
    }

    /// Take one token, sleeping until the window resets when none are left.
    pub async fn acquire(&mut self) {
        let elapsed = self.window_start.elapsed();
        if elapsed >= self.window {
            self.tokens = self.capacity;
            self.window_start = Instant::now();
        }

        if self.tokens > 0 {
            self.tokens -= 1;
        } else {
            let remaining = self.window.saturating_sub(elapsed);
            tracing::warn!(sleep_ms = remaining.as_millis() as u64, "GitHub rate limit reached, sleeping");
            tokio::time::sleep(remaining).await;
            self.tokens = self.capacity.saturating_sub(1);
            self.window_start = Instant::now();
        }
    }
}

/// HTTP client scoped to one repository.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    token: String,
    api_base: String,
    owner: String,
    repo: String,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            token: token.into(),
            api_base: GITHUB_API_BASE.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(5_000, Duration::from_secs(3_600)))),
        }
    }

    /// Point the client at another API root (GitHub Enterprise, test servers).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Read the token from `token_env`. Missing or empty variables are an error.
    pub fn from_env(token_env: &str, owner: &str, repo: &str) -> DomainResult<Self> {
        let token = std::env::var(token_env).unwrap_or_default();
        if token.trim().is_empty() {
            return Err(DomainError::external(
                "github",
                format!("{token_env} environment variable is not set"),
            ));
        }
        Ok(Self::new(token, owner, repo))
    }

    fn issue_url(&self, suffix: &str) -> String {
        format!("{}/repos/{}/{}/issues{suffix}", self.api_base, self.owner, self.repo)
    }

    async fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.rate_limiter.lock().await.acquire().await;
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "foreman")
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> DomainResult<Response> {
        let resp = request
            .send()
            .await
            .map_err(|e| DomainError::external("github", format!("{operation} request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DomainError::external(
                "github",
                format!("{operation} returned {status}: {body}"),
            ));
        }
        Ok(resp)
    }

    async fn parse<T: DeserializeOwned>(operation: &str, resp: Response) -> DomainResult<T> {
        resp.json::<T>()
            .await
            .map_err(|e| DomainError::external("github", format!("{operation} parse failed: {e}")))
    }

    pub async fn get_issue(&self, number: u64) -> DomainResult<GitHubIssue> {
        let url = self.issue_url(&format!("/{number}"));
        let resp = self.send("get_issue", self.request(Method::GET, &url).await).await?;
        Self::parse("get_issue", resp).await
    }

    /// Every issue in `state`, following pages. Pull requests are included.
    pub async fn list_issues(&self, state: &str) -> DomainResult<Vec<GitHubIssue>> {
        let mut issues = Vec::new();
        for page in 1.. {
            let url = self.issue_url(&format!("?state={state}&per_page={PER_PAGE}&page={page}"));
            let resp = self.send("list_issues", self.request(Method::GET, &url).await).await?;
            let batch: Vec<GitHubIssue> = Self::parse("list_issues", resp).await?;
            let last_page = batch.len() < PER_PAGE;
            issues.extend(batch);
            if last_page {
                break;
            }
        }
        Ok(issues)
    }

    pub async fn post_comment(&self, number: u64, body: &str) -> DomainResult<()> {
        let url = self.issue_url(&format!("/{number}/comments"));
        let payload = GitHubCommentRequest { body: body.to_string() };
        self.send("post_comment", self.request(Method::POST, &url).await.json(&payload))
            .await?;
        Ok(())
    }

    /// Replace the issue's labels.
    pub async fn set_labels(&self, number: u64, labels: Vec<String>) -> DomainResult<()> {
        let url = self.issue_url(&format!("/{number}/labels"));
        let payload = GitHubSetLabelsRequest { labels };
        self.send("set_labels", self.request(Method::PUT, &url).await.json(&payload))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_acquire_decrements_tokens() {
        let mut rl = RateLimiter::new(5, Duration::from_secs(60));
        rl.acquire().await;
        rl.acquire().await;
        assert_eq!(rl.tokens, 3);
    }

    #[test]
    fn test_from_env_requires_token() {
        temp_env::with_var("FOREMAN_TEST_MISSING_TOKEN", None::<&str>, || {
            assert!(GitHubClient::from_env("FOREMAN_TEST_MISSING_TOKEN", "o", "r").is_err());
        });
        temp_env::with_var("FOREMAN_TEST_TOKEN", Some("ghp_x"), || {
            let client = GitHubClient::from_env("FOREMAN_TEST_TOKEN", "o", "r").unwrap();
            assert_eq!(client.token, "ghp_x");
        });
    }

    #[test]
    fn test_issue_url_uses_api_base() {
        let client = GitHubClient::new("t", "acme", "app").with_api_base("http://localhost:9999/");
        assert_eq!(client.issue_url("/3"), "http://localhost:9999/repos/acme/app/issues/3");
    }
}
