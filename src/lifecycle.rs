//! Task-branch lifecycle orchestration.
//!
//! Owns the persisted [`LifecycleState`] and implements the status-change
//! state machine on top of the git engine. Every public method is atomic
//! with respect to persisted state: validation happens first (failing
//! without side effects), git work runs next, and the full state is written
//! once the terminal outcome is known. Command failures propagate as result
//! values, never as panics or exceptions.
//!
//! Callers must serialize invocations per project root; the underlying
//! working tree is a singleton.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

use crate::core::branch_name;
use crate::core::state::{
    Initiator, LifecycleState, OperationLogEntry, ReviewBranchInfo, TaskBranchMapping,
};
use crate::core::transition::{TransitionKind, classify};
use crate::core::types::{GitConfig, GitMode, MergeOutcome, Task, TaskStatus};
use crate::io::git::{ExecResult, GitEngine};
use crate::io::state_store::{load_state, state_path, write_state};

/// Result returned from every transition-handling call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransitionResult {
    pub success: bool,
    pub branch_name: Option<String>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub merge: Option<MergeOutcome>,
}

impl TransitionResult {
    fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    fn ok_branch(branch: impl Into<String>) -> Self {
        Self {
            success: true,
            branch_name: Some(branch.into()),
            ..Self::default()
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    fn with_warnings(mut self, mut warnings: Vec<String>) -> Self {
        warnings.append(&mut self.warnings);
        self.warnings = warnings;
        self
    }
}

/// Stateful orchestrator correlating task status changes to branch
/// side effects for one project root.
pub struct LifecycleManager {
    engine: GitEngine,
    state_path: PathBuf,
    state: LifecycleState,
}

impl LifecycleManager {
    /// Open the manager for a project root, loading persisted state (or the
    /// empty state when none exists).
    pub fn open(project_root: impl Into<PathBuf>) -> Self {
        let root = project_root.into();
        let path = state_path(&root);
        Self::with_engine(GitEngine::new(root), path)
    }

    /// Construct with an injected engine and state path. Tests and embedders
    /// use this to control both.
    pub fn with_engine(engine: GitEngine, state_path: PathBuf) -> Self {
        let state = load_state(&state_path);
        Self {
            engine,
            state_path,
            state,
        }
    }

    pub fn engine(&self) -> &GitEngine {
        &self.engine
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn mapping(&self, task_id: &str) -> Option<&TaskBranchMapping> {
        self.state.mapping(task_id)
    }

    pub fn mappings(&self) -> &[TaskBranchMapping] {
        &self.state.mappings
    }

    pub fn mapping_by_branch(&self, branch: &str) -> Option<&TaskBranchMapping> {
        self.state.mapping_by_branch(branch)
    }

    /// Most recent operation log entries, newest first, optionally filtered
    /// by task.
    pub fn operation_logs(&self, limit: usize, task_id: Option<&str>) -> Vec<&OperationLogEntry> {
        self.state
            .operation_log
            .iter()
            .rev()
            .filter(|entry| match task_id {
                Some(id) => entry.task_id.as_deref() == Some(id),
                None => true,
            })
            .take(limit)
            .collect()
    }

    /// Dispatch a task status change to its branch action.
    ///
    /// With git disabled or mode `none`, every transition is a no-op
    /// success: zero subprocess calls and zero state writes.
    #[instrument(skip_all, fields(task_id = %task.id, ?from, ?to))]
    pub fn handle_status_change(
        &mut self,
        task: &Task,
        from: TaskStatus,
        to: TaskStatus,
        config: &GitConfig,
    ) -> TransitionResult {
        if !config.active() {
            debug!("git automation disabled, skipping transition");
            return TransitionResult::ok();
        }
        match classify(from, to) {
            TransitionKind::StartWork => self.start_work(task, config),
            TransitionKind::MoveToReview => self.move_to_review(task, config),
            TransitionKind::Complete => self.complete(task, config),
            TransitionKind::RevertFromReview => self.revert_from_review(task, config),
            TransitionKind::Ignore => TransitionResult::ok(),
        }
    }

    // ---- transitions ----

    /// backlog/todo → doing: checkout an existing task branch, or cut a new
    /// one from main.
    fn start_work(&mut self, task: &Task, config: &GitConfig) -> TransitionResult {
        if let Some(mapping) = self.state.mapping(&task.id) {
            let branch = mapping.branch_name.clone();
            let checkout = self.engine.checkout_branch(&branch);
            self.record(Some(&task.id), Initiator::System, &checkout);
            let result = if checkout.success {
                self.state.set_checked_out(&task.id);
                debug!(branch = %branch, "resumed existing task branch");
                TransitionResult::ok_branch(branch)
            } else {
                TransitionResult::fail(checkout.error_message())
            };
            return self.finish(result);
        }

        let mut warnings = Vec::new();
        if config.mode == GitMode::Advanced {
            // Cut from an up-to-date main; a pull failure is survivable.
            let checkout = self.engine.checkout_branch(&config.main_branch);
            self.record(Some(&task.id), Initiator::System, &checkout);
            if !checkout.success {
                return self.finish(TransitionResult::fail(format!(
                    "checkout '{}' failed: {}",
                    config.main_branch,
                    checkout.error_message()
                )));
            }
            let pull = self.engine.pull();
            self.record(Some(&task.id), Initiator::System, &pull);
            if !pull.success {
                warnings.push(format!(
                    "pull of '{}' failed: {}",
                    config.main_branch,
                    pull.error_message()
                ));
            }
        }

        let branch = branch_name::generate(&task.id, &task.title, &config.branch_convention);
        if self.engine.branch_exists(&branch) {
            return self.finish(
                TransitionResult::fail(format!("branch '{branch}' already exists"))
                    .with_warnings(warnings),
            );
        }

        let create = self.engine.create_branch(&branch, &config.main_branch);
        self.record(Some(&task.id), Initiator::System, &create);
        if !create.success {
            return self.finish(
                TransitionResult::fail(format!(
                    "create branch '{branch}' failed: {}",
                    create.error_message()
                ))
                .with_warnings(warnings),
            );
        }

        let base = self.engine.rev_parse(&branch).ok();
        let mut mapping = TaskBranchMapping::new(&task.id, &branch);
        mapping.base_commit_hash = base.clone();
        mapping.head_commit_hash = base;
        self.state.mappings.push(mapping);

        let checkout = self.engine.checkout_branch(&branch);
        self.record(Some(&task.id), Initiator::System, &checkout);
        if !checkout.success {
            return self.finish(
                TransitionResult::fail(format!(
                    "branch '{branch}' created but checkout failed: {}",
                    checkout.error_message()
                ))
                .with_warnings(warnings),
            );
        }
        self.state.set_checked_out(&task.id);
        info!(branch = %branch, "started work on task branch");
        self.finish(TransitionResult::ok_branch(branch).with_warnings(warnings))
    }

    /// doing → review: in advanced mode, commit pending work and stage the
    /// branch into the review branch when one is configured.
    fn move_to_review(&mut self, task: &Task, config: &GitConfig) -> TransitionResult {
        let Some(mapping) = self.state.mapping(&task.id) else {
            return TransitionResult::fail(no_mapping(&task.id));
        };
        let branch = mapping.branch_name.clone();
        if config.mode == GitMode::Basic {
            return TransitionResult::ok_branch(branch);
        }

        let mut warnings = Vec::new();
        match self.engine.status() {
            Ok(status) if status.is_dirty() => {
                let stage = self.engine.stage_all();
                self.record(Some(&task.id), Initiator::System, &stage);
                if stage.success {
                    let message = format!("chore: save work for task {} ({})", task.id, task.title);
                    let commit = self.engine.commit(&message, false);
                    self.record(Some(&task.id), Initiator::System, &commit);
                    if commit.success {
                        if let Ok(head) = self.engine.head_commit()
                            && let Some(mapping) = self.state.mapping_mut(&task.id)
                        {
                            mapping.head_commit_hash = Some(head);
                        }
                    } else {
                        warnings.push(format!("auto-commit failed: {}", commit.error_message()));
                    }
                } else {
                    warnings.push(format!(
                        "staging changes failed: {}",
                        stage.error_message()
                    ));
                }
            }
            Ok(_) => {}
            Err(err) => warnings.push(format!("status check failed: {err:#}")),
        }

        if config.review_branch.is_some() {
            let result = self
                .merge_to_review_inner(&task.id, config, Initiator::System)
                .with_warnings(warnings);
            return self.finish(result);
        }
        self.finish(TransitionResult::ok_branch(branch).with_warnings(warnings))
    }

    /// review → done: merge to main and retire the branch (advanced), or
    /// mark the mapping merged (basic).
    fn complete(&mut self, task: &Task, config: &GitConfig) -> TransitionResult {
        let Some(mapping) = self.state.mapping(&task.id) else {
            return TransitionResult::fail(no_mapping(&task.id));
        };
        let branch = mapping.branch_name.clone();

        if config.mode == GitMode::Basic {
            if let Some(mapping) = self.state.mapping_mut(&task.id) {
                mapping.is_merged = true;
            }
            return self.finish(TransitionResult::ok_branch(branch));
        }

        let mut result = self.merge_to_main_inner(&task.id, config, Initiator::System);
        if result.success {
            let delete = self.engine.delete_branch(&branch, false);
            self.record(Some(&task.id), Initiator::System, &delete);
            if delete.success {
                // Branch gone, so the mapping goes with it.
                self.state.remove_mapping(&task.id);
                info!(branch = %branch, "task branch merged and removed");
            } else {
                result.warnings.push(format!(
                    "branch '{branch}' was merged but could not be deleted: {}",
                    delete.error_message()
                ));
            }
        }
        self.finish(result)
    }

    /// review → doing: return to the task branch; earlier review merges are
    /// not undone.
    fn revert_from_review(&mut self, task: &Task, config: &GitConfig) -> TransitionResult {
        let Some(mapping) = self.state.mapping(&task.id) else {
            return TransitionResult::fail(no_mapping(&task.id));
        };
        let branch = mapping.branch_name.clone();
        if config.mode == GitMode::Basic {
            return TransitionResult::ok_branch(branch);
        }

        let checkout = self.engine.checkout_branch(&branch);
        self.record(Some(&task.id), Initiator::System, &checkout);
        if !checkout.success {
            return self.finish(TransitionResult::fail(checkout.error_message()));
        }
        self.state.set_checked_out(&task.id);

        let mut warnings = Vec::new();
        if let Some(review) = self.state.review_branch.as_mut()
            && let Some(index) = review
                .merged_task_ids
                .iter()
                .position(|id| id == &task.id)
        {
            review.merged_task_ids.remove(index);
            warnings.push(format!(
                "earlier merges of task {} into '{}' are not undone automatically",
                task.id, review.name
            ));
        }
        // The review-branch merge no longer counts for this task.
        if let Some(mapping) = self.state.mapping_mut(&task.id)
            && mapping.merged_to == config.review_branch
        {
            mapping.is_merged = false;
            mapping.merged_to = None;
            mapping.merge_commit_hash = None;
        }
        self.finish(TransitionResult::ok_branch(branch).with_warnings(warnings))
    }

    // ---- merge orchestration ----

    /// Merge a task branch into the configured review branch.
    #[instrument(skip_all, fields(task_id))]
    pub fn merge_to_review(&mut self, task_id: &str, config: &GitConfig) -> TransitionResult {
        if config.review_branch.is_none() {
            return TransitionResult::fail("no review branch configured");
        }
        if self.state.mapping(task_id).is_none() {
            return TransitionResult::fail(no_mapping(task_id));
        }
        let result = self.merge_to_review_inner(task_id, config, Initiator::User);
        self.finish(result)
    }

    fn merge_to_review_inner(
        &mut self,
        task_id: &str,
        config: &GitConfig,
        initiated_by: Initiator,
    ) -> TransitionResult {
        let Some(review) = config.review_branch.clone() else {
            return TransitionResult::fail("no review branch configured");
        };
        let Some(mapping) = self.state.mapping(task_id) else {
            return TransitionResult::fail(no_mapping(task_id));
        };
        let branch = mapping.branch_name.clone();

        if !self.engine.branch_exists(&review) {
            let create = self.engine.create_branch(&review, &config.main_branch);
            self.record(Some(task_id), initiated_by, &create);
            if !create.success {
                return TransitionResult::fail(format!(
                    "create review branch '{review}' failed: {}",
                    create.error_message()
                ));
            }
            info!(branch = %review, "created review branch");
        }
        let checkout = self.engine.checkout_branch(&review);
        self.record(Some(task_id), initiated_by, &checkout);
        if !checkout.success {
            return TransitionResult::fail(format!(
                "checkout '{review}' failed: {}",
                checkout.error_message()
            ));
        }

        let message = format!("Merge task {task_id} into {review}");
        let merge = self.engine.merge_raw(&branch, false, Some(&message));
        self.record(Some(task_id), initiated_by, &merge);
        let outcome = match self.engine.merge_outcome(&merge, false) {
            Ok(outcome) => outcome,
            Err(err) => return TransitionResult::fail(format!("{err:#}")),
        };
        if !outcome.success {
            let mut result = TransitionResult::fail(
                outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "merge failed".to_string()),
            );
            result.branch_name = Some(branch);
            result.merge = Some(outcome);
            return result;
        }

        if let Some(mapping) = self.state.mapping_mut(task_id) {
            mapping.is_merged = true;
            mapping.merged_to = Some(review.clone());
            mapping.merge_commit_hash = outcome.merge_commit_hash.clone();
        }
        let info = self
            .state
            .review_branch
            .get_or_insert_with(|| ReviewBranchInfo::new(&review));
        info.name = review.clone();
        if !info.contains_task(task_id) {
            info.merged_task_ids.push(task_id.to_string());
        }
        info.head_commit_hash = outcome.merge_commit_hash.clone();
        info.last_merge_at = Some(Utc::now());

        let mut result = TransitionResult::ok_branch(branch);
        result.merge = Some(outcome);
        result
    }

    /// Merge a task branch directly into main.
    #[instrument(skip_all, fields(task_id))]
    pub fn merge_to_main(&mut self, task_id: &str, config: &GitConfig) -> TransitionResult {
        if self.state.mapping(task_id).is_none() {
            return TransitionResult::fail(no_mapping(task_id));
        }
        let result = self.merge_to_main_inner(task_id, config, Initiator::User);
        self.finish(result)
    }

    fn merge_to_main_inner(
        &mut self,
        task_id: &str,
        config: &GitConfig,
        initiated_by: Initiator,
    ) -> TransitionResult {
        let Some(mapping) = self.state.mapping(task_id) else {
            return TransitionResult::fail(no_mapping(task_id));
        };
        let branch = mapping.branch_name.clone();

        let mut warnings = Vec::new();
        let checkout = self.engine.checkout_branch(&config.main_branch);
        self.record(Some(task_id), initiated_by, &checkout);
        if !checkout.success {
            return TransitionResult::fail(format!(
                "checkout '{}' failed: {}",
                config.main_branch,
                checkout.error_message()
            ));
        }
        let pull = self.engine.pull();
        self.record(Some(task_id), initiated_by, &pull);
        if !pull.success {
            warnings.push(format!(
                "pull of '{}' failed: {}",
                config.main_branch,
                pull.error_message()
            ));
        }

        let message = format!("Merge task {task_id} into {}", config.main_branch);
        let merge = self.engine.merge_raw(&branch, false, Some(&message));
        self.record(Some(task_id), initiated_by, &merge);
        let outcome = match self.engine.merge_outcome(&merge, false) {
            Ok(outcome) => outcome,
            Err(err) => {
                return TransitionResult::fail(format!("{err:#}")).with_warnings(warnings);
            }
        };
        if !outcome.success {
            let mut result = TransitionResult::fail(
                outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "merge failed".to_string()),
            )
            .with_warnings(warnings);
            result.branch_name = Some(branch);
            result.merge = Some(outcome);
            return result;
        }

        if let Some(mapping) = self.state.mapping_mut(task_id) {
            mapping.is_merged = true;
            mapping.merged_to = Some(config.main_branch.clone());
            mapping.merge_commit_hash = outcome.merge_commit_hash.clone();
        }
        let mut result = TransitionResult::ok_branch(branch).with_warnings(warnings);
        result.merge = Some(outcome);
        result
    }

    /// Merge the review branch into main and re-tag every staged task.
    /// The review branch itself is left intact.
    #[instrument(skip_all)]
    pub fn merge_review_to_main(&mut self, config: &GitConfig) -> TransitionResult {
        let Some(review) = config.review_branch.clone() else {
            return TransitionResult::fail("no review branch configured");
        };

        let mut warnings = Vec::new();
        let checkout = self.engine.checkout_branch(&config.main_branch);
        self.record(None, Initiator::User, &checkout);
        if !checkout.success {
            return self.finish(TransitionResult::fail(format!(
                "checkout '{}' failed: {}",
                config.main_branch,
                checkout.error_message()
            )));
        }
        let pull = self.engine.pull();
        self.record(None, Initiator::User, &pull);
        if !pull.success {
            warnings.push(format!(
                "pull of '{}' failed: {}",
                config.main_branch,
                pull.error_message()
            ));
        }

        let message = format!("Merge branch '{review}' into {}", config.main_branch);
        let merge = self.engine.merge_raw(&review, false, Some(&message));
        self.record(None, Initiator::User, &merge);
        let outcome = match self.engine.merge_outcome(&merge, false) {
            Ok(outcome) => outcome,
            Err(err) => {
                return self
                    .finish(TransitionResult::fail(format!("{err:#}")).with_warnings(warnings));
            }
        };
        if !outcome.success {
            let mut result = TransitionResult::fail(
                outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "merge failed".to_string()),
            )
            .with_warnings(warnings);
            result.merge = Some(outcome);
            return self.finish(result);
        }

        let staged: Vec<String> = self
            .state
            .review_branch
            .as_ref()
            .map(|info| info.merged_task_ids.clone())
            .unwrap_or_default();
        for task_id in &staged {
            if let Some(mapping) = self.state.mapping_mut(task_id) {
                mapping.is_merged = true;
                mapping.merged_to = Some(config.main_branch.clone());
            }
        }
        if let Some(info) = self.state.review_branch.as_mut() {
            info.merged_task_ids.clear();
        }
        info!(count = staged.len(), "review branch merged into main");

        let mut result = TransitionResult::ok_branch(review).with_warnings(warnings);
        result.merge = Some(outcome);
        self.finish(result)
    }

    // ---- maintenance ----

    /// Remove a task's mapping without touching its branch.
    pub fn detach_task(&mut self, task_id: &str) -> TransitionResult {
        match self.state.remove_mapping(task_id) {
            Some(mapping) => {
                self.save();
                debug!(branch = %mapping.branch_name, "detached task from branch");
                TransitionResult::ok_branch(mapping.branch_name)
            }
            None => TransitionResult::fail(no_mapping(task_id)),
        }
    }

    /// Delete local task branches whose task id is not active, dropping the
    /// corresponding mappings. Protected names are skipped. Best-effort;
    /// returns the deleted names.
    #[instrument(skip_all)]
    pub fn cleanup_orphans(
        &mut self,
        active_task_ids: &BTreeSet<String>,
        config: &GitConfig,
    ) -> Result<Vec<String>> {
        let candidates = self.engine.orphan_branches(active_task_ids, config)?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let mut deleted = Vec::new();
        for name in candidates {
            let task_id = self
                .state
                .mapping_by_branch(&name)
                .map(|mapping| mapping.task_id.clone());
            let result = self.engine.delete_branch(&name, true);
            self.record(task_id.as_deref(), Initiator::User, &result);
            if result.success {
                self.state.mappings.retain(|m| m.branch_name != name);
                deleted.push(name);
            } else {
                warn!(branch = %name, error = %result.error_message(), "skipping orphan branch");
            }
        }
        info!(count = deleted.len(), "orphan branches removed");
        self.save();
        Ok(deleted)
    }

    /// Heal drift caused by out-of-band branch operations: drop mappings
    /// whose branch no longer exists and recompute the checked-out flag.
    /// Returns the number of dropped mappings.
    #[instrument(skip_all)]
    pub fn sync_with_git_branches(&mut self) -> Result<usize> {
        let branches = self.engine.list_branches(false)?;
        let names: BTreeSet<&str> = branches.iter().map(|b| b.name.as_str()).collect();
        let current = branches
            .iter()
            .find(|b| b.is_current)
            .map(|b| b.name.clone());

        let before = self.state.mappings.len();
        self.state
            .mappings
            .retain(|mapping| names.contains(mapping.branch_name.as_str()));
        let dropped = before - self.state.mappings.len();
        for mapping in &mut self.state.mappings {
            mapping.is_checked_out = current.as_deref() == Some(mapping.branch_name.as_str());
        }
        if dropped > 0 {
            info!(dropped, "dropped mappings for deleted branches");
        }
        self.save();
        Ok(dropped)
    }

    // ---- bookkeeping ----

    fn record(&mut self, task_id: Option<&str>, initiated_by: Initiator, result: &ExecResult) {
        self.state.push_log(OperationLogEntry {
            id: Ulid::new().to_string(),
            command: result.command.clone(),
            timestamp: Utc::now(),
            task_id: task_id.map(str::to_string),
            success: result.success,
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            initiated_by,
            duration_ms: result.duration_ms,
        });
    }

    /// Persist the full state, then return the result unchanged. A failed
    /// write is logged; the in-memory state stays authoritative for this
    /// instance.
    fn finish(&mut self, result: TransitionResult) -> TransitionResult {
        self.save();
        result
    }

    fn save(&mut self) {
        if let Err(err) = write_state(&self.state_path, &self.state) {
            warn!(err = %err, "failed to persist lifecycle state");
        }
    }
}

fn no_mapping(task_id: &str) -> String {
    format!("no branch mapping for task '{task_id}'")
}
