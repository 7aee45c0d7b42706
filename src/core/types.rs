//! Shared data model for the task-branch core.
//!
//! These types define stable contracts between the engine, the lifecycle
//! manager, and external callers. They carry no behavior beyond small
//! derived accessors and must remain deterministic to serialize.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an external work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Backlog,
    Todo,
    Doing,
    Review,
    Done,
}

/// Narrow view of a task as consumed from the external task store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
}

/// Automation level configured per project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GitMode {
    /// Git automation fully off; every transition is a no-op success.
    None,
    /// Bookkeeping only: mapping flags change, no checkout/merge commands.
    #[default]
    Basic,
    /// Full automation: checkouts, pulls, auto-commits, and merges.
    Advanced,
}

/// Per-project git automation configuration.
///
/// Supplied by an external settings service and treated as read-only input
/// per call; the lifecycle manager never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub enabled: bool,
    pub mode: GitMode,
    /// Branch that task branches are cut from and merged back into.
    pub main_branch: String,
    /// Optional staging branch where in-review tasks accumulate.
    pub review_branch: Option<String>,
    /// Branch name template with `{taskId}` and `{slug}` placeholders.
    pub branch_convention: String,
    /// Branch names exempt from delete and force-push.
    pub protected_branches: Vec<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: GitMode::default(),
            main_branch: "main".to_string(),
            review_branch: None,
            branch_convention: "task/{taskId}-{slug}".to_string(),
            protected_branches: vec!["main".to_string(), "master".to_string()],
        }
    }
}

impl GitConfig {
    /// True when transitions should produce git side effects at all.
    pub fn active(&self) -> bool {
        self.enabled && self.mode != GitMode::None
    }

    pub fn is_protected(&self, branch: &str) -> bool {
        self.protected_branches.iter().any(|name| name == branch)
    }

    pub fn validate(&self) -> Result<()> {
        if self.main_branch.trim().is_empty() {
            return Err(anyhow!("main_branch must be non-empty"));
        }
        if !self.branch_convention.contains("{taskId}") {
            return Err(anyhow!("branch_convention must contain {{taskId}}"));
        }
        if let Some(review) = &self.review_branch
            && review.trim().is_empty()
        {
            return Err(anyhow!("review_branch must be non-empty when set"));
        }
        Ok(())
    }
}

/// Snapshot of the working tree and repo metadata. Derived fresh on each
/// query; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RepositoryStatus {
    pub is_repo: bool,
    /// `None` on detached HEAD or outside a repository.
    pub current_branch: Option<String>,
    pub staged: usize,
    pub modified: usize,
    pub untracked: usize,
    /// Commits ahead of the configured upstream (0 when no upstream).
    pub ahead: usize,
    /// Commits behind the configured upstream (0 when no upstream).
    pub behind: usize,
    pub is_merging: bool,
    pub is_rebasing: bool,
}

impl RepositoryStatus {
    pub fn not_a_repo() -> Self {
        Self::default()
    }

    pub fn is_dirty(&self) -> bool {
        self.staged + self.modified + self.untracked > 0
    }
}

/// One branch as reported by the repository. Derived, not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub is_current: bool,
    pub is_remote: bool,
    /// Task id extracted from the `task/{ID}-...` naming convention.
    pub task_id: Option<String>,
    pub last_commit_hash: Option<String>,
    pub last_commit_date: Option<String>,
    pub last_commit_message: Option<String>,
}

/// One commit from the history query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub date: String,
    pub subject: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    Content,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    Unresolved,
    Resolved,
}

/// One conflicted path surfaced by a failed merge.
///
/// Three-way content is populated from the index stages for text files and
/// left empty for binary files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub file_path: String,
    pub conflict_type: ConflictType,
    pub is_binary: bool,
    pub ours_content: Option<String>,
    pub theirs_content: Option<String>,
    pub base_content: Option<String>,
    pub status: ConflictStatus,
    pub file_size: u64,
}

/// Structured result of a merge attempt. Conflicts are surfaced, never
/// auto-resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub success: bool,
    pub had_conflicts: bool,
    pub conflicts: Vec<ConflictInfo>,
    pub merge_commit_hash: Option<String>,
    pub error: Option<String>,
}

/// How to resolve a single conflicted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the current branch's side.
    Ours,
    /// Keep the incoming branch's side.
    Theirs,
    /// Replace the file with literal content.
    Manual(String),
}
