//! Stage branch controller against real git repositories.

mod helpers;

use std::sync::Arc;

use foreman::adapters::git::GitCli;
use foreman::domain::ports::VersionControl;
use foreman::services::StageBranchController;
use helpers::git::GitFixture;
use helpers::pipeline::stage_config;

fn controller(git: &GitFixture, with_remote: bool) -> StageBranchController {
    StageBranchController::new(Arc::new(GitCli::new(&git.repo)), stage_config(with_remote)).unwrap()
}

// ============================================================================
// Integration branch
// ============================================================================

#[tokio::test]
async fn test_integration_branch_reset_is_idempotent() {
    let git = GitFixture::new();
    let stage = controller(&git, false);
    let main = git.head("main");

    let first = stage.create_or_reset_integration_branch().await.unwrap();
    assert_eq!(first, main);
    assert!(git.branch_exists("foreman/integration"));

    // Junk on the integration branch must not survive a reset.
    git.commit_file("scratch.txt", "leftover\n", "scratch");
    let second = stage.create_or_reset_integration_branch().await.unwrap();
    assert_eq!(second, main);
    assert_eq!(git.head("foreman/integration"), main);
}

#[tokio::test]
async fn test_reset_aborts_leftover_merge() {
    let git = GitFixture::new();
    git.feature_branch("foreman/issue-1", "README.md", "# Demo\n\nstatus: feature\n");
    git.commit_file("README.md", "# Demo\n\nstatus: main\n", "Main edit");
    let stage = controller(&git, false);

    stage.create_or_reset_integration_branch().await.unwrap();
    let attempt = stage.merge_feature_branch("foreman/issue-1", "#1").await.unwrap();
    assert!(attempt.has_conflicts);
    assert!(git.merge_in_progress());

    stage.create_or_reset_integration_branch().await.unwrap();
    assert!(!git.merge_in_progress());
    assert_eq!(git.head("foreman/integration"), git.head("main"));
}

#[tokio::test]
async fn test_reset_fast_forwards_main_from_remote() {
    let git = GitFixture::new();
    // Another clone advanced origin/main.
    git.git(&["checkout", "-q", "-b", "elsewhere"]);
    let upstream = git.commit_file("CHANGELOG.md", "- new\n", "Upstream change");
    git.git(&["push", "-q", "origin", "elsewhere:main"]);
    git.git(&["checkout", "-q", "main"]);

    let stage = controller(&git, true);
    let head = stage.create_or_reset_integration_branch().await.unwrap();
    assert_eq!(head, upstream);
    assert_eq!(git.head("main"), upstream);
}

// ============================================================================
// Feature merges
// ============================================================================

#[tokio::test]
async fn test_clean_feature_merge() {
    let git = GitFixture::new();
    git.feature_branch("foreman/issue-2", "src/cache.rs", "pub fn cache() {}\n");
    let stage = controller(&git, false);

    stage.create_or_reset_integration_branch().await.unwrap();
    let attempt = stage.merge_feature_branch("foreman/issue-2", "#2").await.unwrap();

    assert!(attempt.merged);
    assert!(!attempt.has_conflicts);
    let commit = attempt.commit.unwrap();
    assert_eq!(commit, git.head("foreman/integration"));
    // --no-ff always records a merge commit.
    assert_eq!(git.git(&["rev-list", "--parents", "-n", "1", &commit]).split(' ').count(), 3);
    assert_eq!(git.show("foreman/integration", "src/cache.rs"), "pub fn cache() {}");

    let diff = stage.diff_against_main().await.unwrap();
    assert!(diff.contains("src/cache.rs"));
    assert!(diff.contains("+pub fn cache() {}"));
}

#[tokio::test]
async fn test_conflicting_feature_merge_is_reported() {
    let git = GitFixture::new();
    git.feature_branch("foreman/issue-3", "README.md", "# Demo\n\nstatus: feature\n");
    git.commit_file("README.md", "# Demo\n\nstatus: main\n", "Main edit");
    let stage = controller(&git, false);

    stage.create_or_reset_integration_branch().await.unwrap();
    let attempt = stage.merge_feature_branch("foreman/issue-3", "#3").await.unwrap();

    assert!(!attempt.merged);
    assert!(attempt.has_conflicts);
    assert_eq!(attempt.conflicted_files, vec!["README.md"]);

    stage.abort_merge().await.unwrap();
    assert!(!git.merge_in_progress());
    assert_eq!(git.head("foreman/integration"), git.head("main"));
    // Aborting twice is harmless.
    stage.abort_merge().await.unwrap();
}

#[tokio::test]
async fn test_conflicted_non_ascii_path_is_readable() {
    let git = GitFixture::new();
    git.commit_file("notes/\u{fc}bersicht.md", "draft\n", "Add notes");
    git.feature_branch("foreman/issue-5", "notes/\u{fc}bersicht.md", "feature\n");
    git.commit_file("notes/\u{fc}bersicht.md", "main\n", "Main edit");
    git.git(&["config", "core.quotePath", "true"]);
    let vcs = GitCli::new(&git.repo);
    let stage = controller(&git, false);

    stage.create_or_reset_integration_branch().await.unwrap();
    let attempt = stage.merge_feature_branch("foreman/issue-5", "#5").await.unwrap();
    assert_eq!(attempt.conflicted_files, vec!["notes/\u{fc}bersicht.md"]);

    let content = vcs.read_file(&attempt.conflicted_files[0]).await.unwrap();
    assert!(content.contains("<<<<<<<"));
    assert!(content.contains("feature"));
}

#[tokio::test]
async fn test_resolved_conflicts_commit() {
    let git = GitFixture::new();
    git.feature_branch("foreman/issue-4", "README.md", "# Demo\n\nstatus: feature\n");
    git.commit_file("README.md", "# Demo\n\nstatus: main\n", "Main edit");
    let vcs = GitCli::new(&git.repo);
    let stage = controller(&git, false);

    stage.create_or_reset_integration_branch().await.unwrap();
    stage.merge_feature_branch("foreman/issue-4", "#4").await.unwrap();

    // Unresolved files block the commit.
    assert!(stage.commit_resolved_conflicts("resolve").await.is_err());

    vcs.write_file("README.md", "# Demo\n\nstatus: main + feature\n").await.unwrap();
    vcs.stage("README.md").await.unwrap();
    let commit = stage.commit_resolved_conflicts("Merge #4 with resolved conflicts").await.unwrap();
    assert_eq!(commit, git.head("foreman/integration"));
    assert_eq!(git.show("foreman/integration", "README.md"), "# Demo\n\nstatus: main + feature");
}

// ============================================================================
// Stage and main
// ============================================================================

#[tokio::test]
async fn test_push_to_stage_and_promote() {
    let git = GitFixture::new();
    git.feature_branch("foreman/issue-5", "docs/usage.md", "Usage\n");
    let stage = controller(&git, true);

    stage.create_or_reset_integration_branch().await.unwrap();
    stage.merge_feature_branch("foreman/issue-5", "#5").await.unwrap();
    let push = stage.force_push_to_stage().await.unwrap();

    assert_eq!(push.commit, git.head("foreman/integration"));
    assert_eq!(git.head("stage"), push.commit);
    assert_eq!(git.origin_head("stage"), Some(push.commit.clone()));
    assert!(push.tag.starts_with("stage-"));
    assert_eq!(git.tags("stage-*"), vec![push.tag.clone()]);

    let promoted = stage.merge_stage_to_main().await.unwrap();
    assert!(promoted.merged);
    let main = git.head("main");
    assert_eq!(promoted.commit, Some(main.clone()));
    assert_eq!(git.origin_head("main"), Some(main));
    assert_eq!(git.show("main", "docs/usage.md"), "Usage");
}

#[tokio::test]
async fn test_force_push_overwrites_stage() {
    let git = GitFixture::new();
    git.feature_branch("foreman/issue-6", "a.txt", "a\n");
    git.feature_branch("foreman/issue-7", "b.txt", "b\n");
    let stage = controller(&git, true);

    stage.create_or_reset_integration_branch().await.unwrap();
    stage.merge_feature_branch("foreman/issue-6", "#6").await.unwrap();
    let first = stage.force_push_to_stage().await.unwrap();

    stage.create_or_reset_integration_branch().await.unwrap();
    stage.merge_feature_branch("foreman/issue-7", "#7").await.unwrap();
    let second = stage.force_push_to_stage().await.unwrap();

    assert_ne!(first.commit, second.commit);
    assert_eq!(git.origin_head("stage"), Some(second.commit));
    // Each integration is rebuilt from main, so the first feature is gone from stage.
    assert!(git
        .git(&["ls-tree", "-r", "--name-only", "stage"])
        .lines()
        .all(|f| f != "a.txt"));
}

#[tokio::test]
async fn test_invalid_feature_branch_is_rejected_before_git() {
    let git = GitFixture::new();
    let stage = controller(&git, false);
    stage.create_or_reset_integration_branch().await.unwrap();
    assert!(stage.merge_feature_branch("--upload-pack=x", "#1").await.is_err());
    assert!(stage.merge_feature_branch("a..b", "#1").await.is_err());
}
