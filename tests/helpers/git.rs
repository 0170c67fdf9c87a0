//! Throwaway git repositories with a bare `origin`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

pub struct GitFixture {
    _dir: TempDir,
    pub repo: PathBuf,
    pub origin: PathBuf,
}

impl GitFixture {
    /// A repository on `main` with one commit, pushed to a bare `origin`.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = dir.path().join("repo");
        let origin = dir.path().join("origin.git");
        fs::create_dir_all(&repo).expect("create repo dir");

        run_git(dir.path(), &["init", "-q", "--bare", origin.to_str().expect("utf-8 path")]);
        run_git(&repo, &["init", "-q"]);
        run_git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        run_git(&repo, &["config", "user.email", "foreman@example.com"]);
        run_git(&repo, &["config", "user.name", "Foreman Test"]);
        run_git(&repo, &["config", "commit.gpgsign", "false"]);
        run_git(&repo, &["config", "tag.gpgsign", "false"]);

        let fixture = Self {
            _dir: dir,
            repo,
            origin,
        };
        fixture.commit_file("README.md", "# Demo\n\nstatus: draft\n", "Initial commit");
        fixture.git(&["remote", "add", "origin", fixture.origin.to_str().expect("utf-8 path")]);
        fixture.git(&["push", "-q", "-u", "origin", "main"]);
        fixture
    }

    /// Run git in the working copy, panicking on failure. Returns trimmed stdout.
    pub fn git(&self, args: &[&str]) -> String {
        run_git(&self.repo, args)
    }

    /// Write, stage and commit a file on the current branch.
    pub fn commit_file(&self, path: &str, content: &str, message: &str) -> String {
        let full = self.repo.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(&full, content).expect("write file");
        self.git(&["add", "--", path]);
        self.git(&["commit", "-q", "-m", message]);
        self.head("HEAD")
    }

    /// Create `branch` from main with one commit, then return to main.
    pub fn feature_branch(&self, branch: &str, path: &str, content: &str) -> String {
        self.git(&["checkout", "-q", "-b", branch, "main"]);
        let commit = self.commit_file(path, content, &format!("Work on {branch}"));
        self.git(&["checkout", "-q", "main"]);
        commit
    }

    pub fn head(&self, rev: &str) -> String {
        self.git(&["rev-parse", rev])
    }

    /// Contents of `path` at `rev`.
    pub fn show(&self, rev: &str, path: &str) -> String {
        self.git(&["show", &format!("{rev}:{path}")])
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        Command::new("git")
            .current_dir(&self.repo)
            .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .output()
            .expect("run git")
            .status
            .success()
    }

    /// Commit of `branch` on the bare origin, if it exists there.
    pub fn origin_head(&self, branch: &str) -> Option<String> {
        let out = run_git(&self.origin, &["for-each-ref", "--format=%(objectname)", &format!("refs/heads/{branch}")]);
        (!out.is_empty()).then_some(out)
    }

    pub fn tags(&self, pattern: &str) -> Vec<String> {
        self.git(&["tag", "-l", pattern])
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Commit `path` onto origin's `branch` from a separate clone, as another
    /// developer would. The working copy is left alone.
    pub fn push_from_elsewhere(&self, branch: &str, path: &str, content: &str) -> String {
        let root = self.origin.parent().expect("origin has a parent");
        let clone = root.join("elsewhere");
        if clone.exists() {
            fs::remove_dir_all(&clone).expect("remove old clone");
        }
        run_git(
            root,
            &["clone", "-q", "--branch", branch, self.origin.to_str().expect("utf-8 path"), "elsewhere"],
        );
        run_git(&clone, &["config", "user.email", "other@example.com"]);
        run_git(&clone, &["config", "user.name", "Other Developer"]);
        run_git(&clone, &["config", "commit.gpgsign", "false"]);
        fs::write(clone.join(path), content).expect("write file");
        run_git(&clone, &["add", "--", path]);
        run_git(&clone, &["commit", "-q", "-m", &format!("Edit {path} on {branch}")]);
        run_git(&clone, &["push", "-q", "origin", branch]);
        run_git(&clone, &["rev-parse", "HEAD"])
    }

    pub fn merge_in_progress(&self) -> bool {
        self.repo.join(".git/MERGE_HEAD").exists()
    }
}

fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("run git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}
