//! Persisted lifecycle state: task-branch mappings, the review branch
//! record, and the bounded operation log.
//!
//! The lifecycle manager owns this state exclusively. It is loaded once at
//! construction and rewritten wholesale on every mutation, so helpers here
//! keep the invariants (mapping uniqueness, log bounds) in one place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Most recent entries retained in the operation log.
pub const OPERATION_LOG_CAP: usize = 100;
/// Per-stream character cap for stored command output.
pub const OUTPUT_TRUNCATE_CHARS: usize = 5_000;

/// Persisted association between one task and one branch.
///
/// At most one mapping exists per task id at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBranchMapping {
    pub task_id: String,
    pub branch_name: String,
    pub created_at: DateTime<Utc>,
    /// Commit the branch was cut from.
    pub base_commit_hash: Option<String>,
    /// Last known tip of the branch.
    pub head_commit_hash: Option<String>,
    pub is_checked_out: bool,
    pub is_merged: bool,
    pub merge_commit_hash: Option<String>,
    /// Target branch name of the last merge (review or main).
    pub merged_to: Option<String>,
}

impl TaskBranchMapping {
    pub fn new(task_id: impl Into<String>, branch_name: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            branch_name: branch_name.into(),
            created_at: Utc::now(),
            base_commit_hash: None,
            head_commit_hash: None,
            is_checked_out: false,
            is_merged: false,
            merge_commit_hash: None,
            merged_to: None,
        }
    }
}

/// Singleton record for the staging ("review") branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewBranchInfo {
    pub name: String,
    /// Tasks currently staged into the review branch, in merge order.
    pub merged_task_ids: Vec<String>,
    pub head_commit_hash: Option<String>,
    pub last_merge_at: Option<DateTime<Utc>>,
}

impl ReviewBranchInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            merged_task_ids: Vec::new(),
            head_commit_hash: None,
            last_merge_at: None,
        }
    }

    pub fn contains_task(&self, task_id: &str) -> bool {
        self.merged_task_ids.iter().any(|id| id == task_id)
    }
}

/// Who triggered a logged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Initiator {
    System,
    User,
}

/// One executed git command, as recorded in the bounded operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub id: String,
    pub command: String,
    pub timestamp: DateTime<Utc>,
    pub task_id: Option<String>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub initiated_by: Initiator,
    pub duration_ms: u64,
}

/// The full persisted unit (`.taskbranch/git-state.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LifecycleState {
    pub mappings: Vec<TaskBranchMapping>,
    pub review_branch: Option<ReviewBranchInfo>,
    pub operation_log: Vec<OperationLogEntry>,
}

impl LifecycleState {
    pub fn mapping(&self, task_id: &str) -> Option<&TaskBranchMapping> {
        self.mappings.iter().find(|m| m.task_id == task_id)
    }

    pub fn mapping_mut(&mut self, task_id: &str) -> Option<&mut TaskBranchMapping> {
        self.mappings.iter_mut().find(|m| m.task_id == task_id)
    }

    pub fn mapping_by_branch(&self, branch: &str) -> Option<&TaskBranchMapping> {
        self.mappings.iter().find(|m| m.branch_name == branch)
    }

    pub fn remove_mapping(&mut self, task_id: &str) -> Option<TaskBranchMapping> {
        let index = self.mappings.iter().position(|m| m.task_id == task_id)?;
        Some(self.mappings.remove(index))
    }

    /// Mark one task's branch as checked out and clear the flag everywhere
    /// else. A single working tree means at most one checkout.
    pub fn set_checked_out(&mut self, task_id: &str) {
        for mapping in &mut self.mappings {
            mapping.is_checked_out = mapping.task_id == task_id;
        }
    }

    /// Append an entry, truncating output and evicting the oldest entry
    /// beyond [`OPERATION_LOG_CAP`].
    pub fn push_log(&mut self, mut entry: OperationLogEntry) {
        entry.stdout = truncate_output(&entry.stdout);
        entry.stderr = truncate_output(&entry.stderr);
        self.operation_log.push(entry);
        let excess = self.operation_log.len().saturating_sub(OPERATION_LOG_CAP);
        if excess > 0 {
            self.operation_log.drain(..excess);
        }
    }
}

/// Cap stored output at [`OUTPUT_TRUNCATE_CHARS`] characters, on a char
/// boundary.
pub fn truncate_output(output: &str) -> String {
    match output.char_indices().nth(OUTPUT_TRUNCATE_CHARS) {
        Some((byte_index, _)) => output[..byte_index].to_string(),
        None => output.to_string(),
    }
}
