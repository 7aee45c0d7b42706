//! Test-only fixtures for driving a real git repository in a tempdir.

use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{GitConfig, GitMode, Task, TaskStatus};

/// A throwaway git repository with deterministic identity and a seed commit
/// on `main`.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new().context("create tempdir")?;
        let repo = Self { dir };
        repo.git(&["init", "-b", "main"])?;
        repo.git(&["config", "user.name", "Test User"])?;
        repo.git(&["config", "user.email", "test@example.com"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.write_file("README.md", "# fixture\n")?;
        repo.commit_all("chore: initial commit")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Run a git command in the repo, failing the test on non-zero exit.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        let out = Command::new("git")
            .args(args)
            .current_dir(self.dir.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !out.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }

    pub fn write_file(&self, relative: &str, contents: &str) -> Result<()> {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "-m", message])?;
        Ok(())
    }

    pub fn current_branch(&self) -> Result<String> {
        Ok(self.git(&["branch", "--show-current"])?.trim().to_string())
    }
}

/// Deterministic task record for transition tests.
pub fn sample_task(id: &str, title: &str) -> Task {
    Task {
        id: id.to_string(),
        title: title.to_string(),
        status: TaskStatus::Doing,
    }
}

pub fn basic_config() -> GitConfig {
    GitConfig {
        mode: GitMode::Basic,
        ..GitConfig::default()
    }
}

pub fn advanced_config() -> GitConfig {
    GitConfig {
        mode: GitMode::Advanced,
        ..GitConfig::default()
    }
}

pub fn advanced_config_with_review(review: &str) -> GitConfig {
    GitConfig {
        review_branch: Some(review.to_string()),
        ..advanced_config()
    }
}
