use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};

const FALLBACK_NAME: &str = "redgreen";
const FALLBACK_EMAIL: &str = "redgreen@localhost";

/// Git operations scoped to one working directory
#[derive(Debug, Clone)]
pub struct Git {
    dir: PathBuf,
}

impl Git {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(args = ?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::Vcs {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn succeeds(&self, args: &[&str]) -> bool {
        Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Make sure the directory is a repository with at least one commit and a
    /// usable committer identity.
    pub async fn ensure_repo(&self) -> Result<()> {
        if !self.owns_repo().await? {
            info!(dir = %self.dir.display(), "initializing git repository");
            self.run(&["init"]).await?;
        }

        if !self.succeeds(&["config", "user.email"]).await {
            self.run(&["config", "user.email", FALLBACK_EMAIL]).await?;
        }
        if !self.succeeds(&["config", "user.name"]).await {
            self.run(&["config", "user.name", FALLBACK_NAME]).await?;
        }

        if !self.succeeds(&["rev-parse", "--verify", "HEAD"]).await {
            self.run(&["commit", "--allow-empty", "-m", "Initial commit"])
                .await?;
        }

        Ok(())
    }

    /// Is the directory the top level of its own work tree? A directory nested
    /// inside some other repository does not count.
    async fn owns_repo(&self) -> Result<bool> {
        let toplevel = match self.run(&["rev-parse", "--show-toplevel"]).await {
            Ok(out) => PathBuf::from(out.trim()),
            Err(_) => return Ok(false),
        };
        let dir = tokio::fs::canonicalize(&self.dir).await?;
        let toplevel = tokio::fs::canonicalize(&toplevel).await.unwrap_or(toplevel);
        Ok(dir == toplevel)
    }

    /// SHA of HEAD
    pub async fn current_revision(&self) -> Result<String> {
        Ok(self.run(&["rev-parse", "HEAD"]).await?.trim().to_string())
    }

    /// Commit log with patches for everything after `since`, oldest first.
    /// Empty when HEAD is `since`.
    pub async fn log_since(&self, since: &str) -> Result<String> {
        let range = format!("{}..HEAD", since);
        self.run(&["log", "--reverse", "--patch", "--no-color", &range])
            .await
    }

    /// Count commits since a given SHA
    pub async fn count_commits_since(&self, since: &str) -> Result<u32> {
        let range = format!("{}..HEAD", since);
        let out = self.run(&["rev-list", "--count", &range]).await?;
        parse_count(&range, &out)
    }

    /// Stage everything in the directory and commit, even if nothing changed.
    pub async fn commit_all(&self, message: &str) -> Result<()> {
        self.run(&["add", "--all", "."]).await?;
        self.run(&["commit", "--allow-empty", "--no-verify", "-m", message])
            .await?;
        Ok(())
    }

    /// Collapse every commit after `boundary` into a single commit.
    pub async fn squash(&self, boundary: &str, message: &str) -> Result<()> {
        self.run(&["reset", "--soft", boundary]).await?;
        self.commit_all(message).await
    }
}

fn parse_count(range: &str, out: &str) -> Result<u32> {
    out.trim().parse().map_err(|_| Error::Vcs {
        command: format!("rev-list --count {}", range),
        stderr: format!("unexpected output: {:?}", out.trim()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn repo() -> (TempDir, Git) {
        let dir = TempDir::new().unwrap();
        let git = Git::new(dir.path());
        git.ensure_repo().await.unwrap();
        (dir, git)
    }

    #[tokio::test]
    async fn test_ensure_repo_creates_initial_commit() {
        let (_dir, git) = repo().await;
        let sha = git.current_revision().await.unwrap();
        assert_eq!(sha.len(), 40);
    }

    #[tokio::test]
    async fn test_ensure_repo_nested_in_outer_repo() {
        let outer = TempDir::new().unwrap();
        let sh = |args: &[&str], dir: &std::path::Path| {
            let out = std::process::Command::new("git")
                .args(args)
                .current_dir(dir)
                .output()
                .unwrap();
            assert!(out.status.success(), "git {:?}: {:?}", args, out);
            String::from_utf8_lossy(&out.stdout).into_owned()
        };
        sh(&["init"], outer.path());
        sh(&["config", "user.email", "dev@example.com"], outer.path());
        sh(&["config", "user.name", "dev"], outer.path());
        sh(&["commit", "--allow-empty", "-m", "outer work"], outer.path());
        std::fs::write(outer.path().join("secret.txt"), "staged").unwrap();
        sh(&["add", "secret.txt"], outer.path());
        let outer_head = sh(&["rev-parse", "HEAD"], outer.path());

        let work = outer.path().join("example");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(work.join("main.go"), "package main\n").unwrap();

        let git = Git::new(&work);
        git.ensure_repo().await.unwrap();
        assert!(work.join(".git").exists());

        git.commit_all("Attempt 1").await.unwrap();
        let files = git
            .run(&["show", "--name-only", "--pretty=format:", "HEAD"])
            .await
            .unwrap();
        assert_eq!(files.trim(), "main.go");

        // The outer repository is untouched, staged file included
        assert_eq!(sh(&["rev-parse", "HEAD"], outer.path()), outer_head);
        let staged = sh(&["diff", "--cached", "--name-only"], outer.path());
        assert_eq!(staged.trim(), "secret.txt");
    }

    #[tokio::test]
    async fn test_ensure_repo_is_idempotent() {
        let (_dir, git) = repo().await;
        let before = git.current_revision().await.unwrap();
        git.ensure_repo().await.unwrap();
        assert_eq!(git.current_revision().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_log_since_head_is_empty() {
        let (_dir, git) = repo().await;
        let head = git.current_revision().await.unwrap();
        assert!(git.log_since(&head).await.unwrap().trim().is_empty());
        assert_eq!(git.count_commits_since(&head).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_commit_all_allows_empty() {
        let (_dir, git) = repo().await;
        let head = git.current_revision().await.unwrap();

        git.commit_all("nothing changed").await.unwrap();
        git.commit_all("still nothing").await.unwrap();

        assert_eq!(git.count_commits_since(&head).await.unwrap(), 2);
        let log = git.log_since(&head).await.unwrap();
        assert!(log.contains("nothing changed"));
        assert!(log.contains("still nothing"));
    }

    #[tokio::test]
    async fn test_squash_collapses_commits() {
        let (dir, git) = repo().await;
        let boundary = git.current_revision().await.unwrap();

        for i in 0..3 {
            std::fs::write(dir.path().join("main.go"), format!("v{}", i)).unwrap();
            git.commit_all(&format!("attempt {}", i)).await.unwrap();
        }
        assert_eq!(git.count_commits_since(&boundary).await.unwrap(), 3);

        git.squash(&boundary, "Add main").await.unwrap();

        assert_eq!(git.count_commits_since(&boundary).await.unwrap(), 1);
        let log = git.log_since(&boundary).await.unwrap();
        assert!(log.contains("Add main"));
        assert!(!log.contains("attempt 1"));
        assert!(log.contains("+v2"));
    }

    #[test]
    fn test_parse_count_rejects_garbage() {
        assert_eq!(parse_count("a..HEAD", "3\n").unwrap(), 3);
        match parse_count("a..HEAD", "fatal: nope").unwrap_err() {
            Error::Vcs { command, stderr } => {
                assert_eq!(command, "rev-list --count a..HEAD");
                assert!(stderr.contains("fatal: nope"));
            }
            other => panic!("Expected Vcs error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_command_reports_stderr() {
        let (_dir, git) = repo().await;
        let err = git.log_since("not-a-revision").await.unwrap_err();
        match err {
            Error::Vcs { command, stderr } => {
                assert!(command.starts_with("log"));
                assert!(!stderr.is_empty());
            }
            other => panic!("Expected Vcs error, got {:?}", other),
        }
    }
}
