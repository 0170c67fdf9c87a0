//! GitHub Issues adapter.

pub mod client;
pub mod models;
pub mod tracker;

pub use client::GitHubClient;
pub use tracker::GitHubIssueTracker;
