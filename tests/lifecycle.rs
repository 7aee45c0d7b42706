//! End-to-end lifecycle scenarios: status transitions driving real git
//! repositories, persistence, and the operation log.

use std::collections::BTreeSet;

use taskbranch::core::types::{GitConfig, TaskStatus};
use taskbranch::io::git::GitEngine;
use taskbranch::io::state_store::state_path;
use taskbranch::lifecycle::LifecycleManager;
use taskbranch::test_support::{
    TestRepo, advanced_config, advanced_config_with_review, basic_config, sample_task,
};

fn manager(repo: &TestRepo) -> LifecycleManager {
    LifecycleManager::open(repo.path())
}

/// Scenario A: backlog→doing in advanced mode cuts and checks out a
/// convention-named branch from a clean main.
#[test]
fn start_work_creates_and_checks_out_task_branch() {
    let repo = TestRepo::new().expect("repo");
    let mut manager = manager(&repo);
    let task = sample_task("T-1", "Add login");

    let result =
        manager.handle_status_change(&task, TaskStatus::Backlog, TaskStatus::Doing, &advanced_config());
    assert!(result.success, "transition failed: {:?}", result.error);
    assert_eq!(result.branch_name.as_deref(), Some("task/T-1-add-login"));
    assert_eq!(repo.current_branch().expect("branch"), "task/T-1-add-login");

    let mapping = manager.mapping("T-1").expect("mapping");
    assert_eq!(mapping.branch_name, "task/T-1-add-login");
    assert!(mapping.is_checked_out);
    assert!(!mapping.is_merged);
    assert!(mapping.base_commit_hash.is_some());
    assert_eq!(mapping.base_commit_hash, mapping.head_commit_hash);
}

/// A second start for the same task resumes the existing branch instead of
/// creating a duplicate mapping.
#[test]
fn start_work_is_idempotent_per_task() {
    let repo = TestRepo::new().expect("repo");
    let mut manager = manager(&repo);
    let task = sample_task("T-1", "Add login");
    let config = advanced_config();

    manager.handle_status_change(&task, TaskStatus::Backlog, TaskStatus::Doing, &config);
    repo.git(&["checkout", "main"]).expect("checkout");

    let result = manager.handle_status_change(&task, TaskStatus::Todo, TaskStatus::Doing, &config);
    assert!(result.success);
    assert_eq!(manager.mappings().len(), 1);
    assert_eq!(repo.current_branch().expect("branch"), "task/T-1-add-login");
}

/// A colliding branch name fails the transition and leaves no mapping.
#[test]
fn start_work_rejects_existing_branch() {
    let repo = TestRepo::new().expect("repo");
    repo.git(&["branch", "task/T-1-add-login"]).expect("branch");
    let mut manager = manager(&repo);
    let task = sample_task("T-1", "Add login");

    let result =
        manager.handle_status_change(&task, TaskStatus::Backlog, TaskStatus::Doing, &advanced_config());
    assert!(!result.success);
    assert!(result.error.expect("error").contains("already exists"));
    assert!(manager.mapping("T-1").is_none());
}

/// Scenario B: doing→review with a review branch and a dirty tree commits
/// pending work and stages the task into the review branch.
#[test]
fn move_to_review_commits_and_merges_into_review_branch() {
    let repo = TestRepo::new().expect("repo");
    let mut manager = manager(&repo);
    let task = sample_task("T-1", "Add login");
    let config = advanced_config_with_review("develop");

    manager.handle_status_change(&task, TaskStatus::Backlog, TaskStatus::Doing, &config);
    repo.write_file("src/login.rs", "pub fn login() {}\n").expect("write");

    let result = manager.handle_status_change(&task, TaskStatus::Doing, TaskStatus::Review, &config);
    assert!(result.success, "transition failed: {:?}", result.error);
    assert_eq!(repo.current_branch().expect("branch"), "develop");
    assert!(repo.path().join("src/login.rs").exists());

    let mapping = manager.mapping("T-1").expect("mapping");
    assert!(mapping.is_merged);
    assert_eq!(mapping.merged_to.as_deref(), Some("develop"));

    let review = manager.state().review_branch.as_ref().expect("review");
    assert_eq!(review.name, "develop");
    assert_eq!(review.merged_task_ids, vec!["T-1".to_string()]);
    assert!(review.head_commit_hash.is_some());
    assert!(review.last_merge_at.is_some());
}

/// review→done in advanced mode merges to main and retires the branch.
#[test]
fn complete_merges_to_main_and_deletes_branch() {
    let repo = TestRepo::new().expect("repo");
    let mut manager = manager(&repo);
    let task = sample_task("T-1", "Add login");
    let config = advanced_config();

    manager.handle_status_change(&task, TaskStatus::Backlog, TaskStatus::Doing, &config);
    repo.write_file("src/login.rs", "pub fn login() {}\n").expect("write");
    repo.commit_all("feat: login").expect("commit");

    let result = manager.handle_status_change(&task, TaskStatus::Review, TaskStatus::Done, &config);
    assert!(result.success, "transition failed: {:?}", result.error);
    assert_eq!(repo.current_branch().expect("branch"), "main");
    assert!(repo.path().join("src/login.rs").exists());

    let engine = GitEngine::new(repo.path());
    assert!(!engine.branch_exists("task/T-1-add-login"));
    // Branch deleted, mapping removed with it.
    assert!(manager.mapping("T-1").is_none());
}

/// Scenario C: a conflicting merge to main fails, surfaces the conflict,
/// and leaves mapping and branch untouched.
#[test]
fn complete_surfaces_merge_conflicts() {
    let repo = TestRepo::new().expect("repo");
    repo.write_file("src/app.ts", "export const x = 1;\n").expect("write");
    repo.commit_all("feat: seed app").expect("commit");

    let mut manager = manager(&repo);
    let task = sample_task("T-1", "Conflict work");
    let config = advanced_config();

    manager.handle_status_change(&task, TaskStatus::Backlog, TaskStatus::Doing, &config);
    repo.write_file("src/app.ts", "export const x = 2;\n").expect("write");
    repo.commit_all("feat: task side").expect("commit");

    repo.git(&["checkout", "main"]).expect("checkout");
    repo.write_file("src/app.ts", "export const x = 3;\n").expect("write");
    repo.commit_all("feat: main side").expect("commit");

    let result = manager.handle_status_change(&task, TaskStatus::Review, TaskStatus::Done, &config);
    assert!(!result.success);
    let merge = result.merge.expect("merge outcome");
    assert!(merge.had_conflicts);
    assert_eq!(merge.conflicts[0].file_path, "src/app.ts");

    let mapping = manager.mapping("T-1").expect("mapping");
    assert!(!mapping.is_merged);
    let engine = GitEngine::new(repo.path());
    assert!(engine.branch_exists("task/T-1-conflict-work"));

    engine.abort_merge();
}

/// Scenario D: basic mode review/done transitions never run git commands;
/// only mapping flags change.
#[test]
fn basic_mode_flips_flags_without_git_commands() {
    let repo = TestRepo::new().expect("repo");
    let mut manager = manager(&repo);
    let task = sample_task("T-1", "Add login");
    let config = basic_config();

    manager.handle_status_change(&task, TaskStatus::Backlog, TaskStatus::Doing, &config);
    let branch = repo.current_branch().expect("branch");
    let log_len = manager.state().operation_log.len();

    let review = manager.handle_status_change(&task, TaskStatus::Doing, TaskStatus::Review, &config);
    assert!(review.success);
    let done = manager.handle_status_change(&task, TaskStatus::Review, TaskStatus::Done, &config);
    assert!(done.success);

    // No checkout or merge happened.
    assert_eq!(manager.state().operation_log.len(), log_len);
    assert_eq!(repo.current_branch().expect("branch"), branch);

    let mapping = manager.mapping("T-1").expect("mapping");
    assert!(mapping.is_merged);
    assert!(GitEngine::new(repo.path()).branch_exists(&mapping.branch_name));
}

/// review→doing in advanced mode returns to the task branch and unstages
/// the task from the review set.
#[test]
fn revert_from_review_returns_to_task_branch() {
    let repo = TestRepo::new().expect("repo");
    let mut manager = manager(&repo);
    let task = sample_task("T-1", "Add login");
    let config = advanced_config_with_review("develop");

    manager.handle_status_change(&task, TaskStatus::Backlog, TaskStatus::Doing, &config);
    repo.write_file("src/login.rs", "pub fn login() {}\n").expect("write");
    manager.handle_status_change(&task, TaskStatus::Doing, TaskStatus::Review, &config);

    let result = manager.handle_status_change(&task, TaskStatus::Review, TaskStatus::Doing, &config);
    assert!(result.success, "transition failed: {:?}", result.error);
    assert_eq!(repo.current_branch().expect("branch"), "task/T-1-add-login");
    assert!(result.warnings.iter().any(|w| w.contains("not undone")));

    let review = manager.state().review_branch.as_ref().expect("review");
    assert!(review.merged_task_ids.is_empty());
    let mapping = manager.mapping("T-1").expect("mapping");
    assert!(!mapping.is_merged);
    assert!(mapping.is_checked_out);
}

/// Merging the review branch into main re-tags every staged task and
/// clears the review set, leaving the branch in place.
#[test]
fn merge_review_to_main_retags_staged_tasks() {
    let repo = TestRepo::new().expect("repo");
    let mut manager = manager(&repo);
    let config = advanced_config_with_review("develop");

    let first = sample_task("T-1", "Add login");
    manager.handle_status_change(&first, TaskStatus::Backlog, TaskStatus::Doing, &config);
    repo.write_file("src/login.rs", "pub fn login() {}\n").expect("write");
    manager.handle_status_change(&first, TaskStatus::Doing, TaskStatus::Review, &config);

    let second = sample_task("T-2", "Add logout");
    manager.handle_status_change(&second, TaskStatus::Backlog, TaskStatus::Doing, &config);
    repo.write_file("src/logout.rs", "pub fn logout() {}\n").expect("write");
    manager.handle_status_change(&second, TaskStatus::Doing, TaskStatus::Review, &config);

    let result = manager.merge_review_to_main(&config);
    assert!(result.success, "merge failed: {:?}", result.error);
    assert_eq!(repo.current_branch().expect("branch"), "main");
    assert!(repo.path().join("src/login.rs").exists());
    assert!(repo.path().join("src/logout.rs").exists());

    for id in ["T-1", "T-2"] {
        let mapping = manager.mapping(id).expect("mapping");
        assert!(mapping.is_merged);
        assert_eq!(mapping.merged_to.as_deref(), Some("main"));
    }
    let review = manager.state().review_branch.as_ref().expect("review");
    assert!(review.merged_task_ids.is_empty());
    assert!(GitEngine::new(repo.path()).branch_exists("develop"));
}

/// With git disabled (or mode none), transitions are no-op successes with
/// zero subprocess calls and zero state writes.
#[test]
fn disabled_automation_is_a_noop() {
    let repo = TestRepo::new().expect("repo");
    let mut manager = manager(&repo);
    let task = sample_task("T-1", "Add login");
    let config = GitConfig {
        enabled: false,
        ..advanced_config()
    };

    let result =
        manager.handle_status_change(&task, TaskStatus::Backlog, TaskStatus::Doing, &config);
    assert!(result.success);
    assert!(result.branch_name.is_none());
    assert!(manager.mappings().is_empty());
    assert!(manager.state().operation_log.is_empty());
    assert!(!state_path(repo.path()).exists());
    assert_eq!(repo.current_branch().expect("branch"), "main");
}

/// A transition that fails validation leaves no log entry and no state
/// file behind.
#[test]
fn validation_failure_has_no_side_effects() {
    let repo = TestRepo::new().expect("repo");
    let mut manager = manager(&repo);
    let task = sample_task("T-404", "Ghost");

    let result = manager.handle_status_change(
        &task,
        TaskStatus::Doing,
        TaskStatus::Review,
        &advanced_config(),
    );
    assert!(!result.success);
    assert!(result.error.expect("error").contains("no branch mapping"));
    assert!(manager.state().operation_log.is_empty());
    assert!(!state_path(repo.path()).exists());
}

/// Reopening a manager yields an equivalent state: mappings, review set,
/// and log survive the round trip.
#[test]
fn state_survives_reopen() {
    let repo = TestRepo::new().expect("repo");
    let config = advanced_config_with_review("develop");
    let task = sample_task("T-1", "Add login");

    let mut first = manager(&repo);
    first.handle_status_change(&task, TaskStatus::Backlog, TaskStatus::Doing, &config);
    repo.write_file("src/login.rs", "pub fn login() {}\n").expect("write");
    first.handle_status_change(&task, TaskStatus::Doing, TaskStatus::Review, &config);
    let saved = first.state().clone();
    drop(first);

    let reopened = manager(&repo);
    assert_eq!(reopened.state(), &saved);
}

/// Scenario E: cleanup removes branches for inactive tasks only, along
/// with their mappings.
#[test]
fn cleanup_orphans_removes_inactive_task_branches() {
    let repo = TestRepo::new().expect("repo");
    let mut manager = manager(&repo);
    let config = basic_config();

    manager.handle_status_change(
        &sample_task("T-1", "One"),
        TaskStatus::Backlog,
        TaskStatus::Doing,
        &config,
    );
    manager.handle_status_change(
        &sample_task("T-2", "Two"),
        TaskStatus::Backlog,
        TaskStatus::Doing,
        &config,
    );
    repo.git(&["checkout", "main"]).expect("checkout");

    let active: BTreeSet<String> = ["T-2".to_string()].into_iter().collect();
    let deleted = manager.cleanup_orphans(&active, &config).expect("cleanup");
    assert_eq!(deleted, vec!["task/T-1-one".to_string()]);
    assert!(manager.mapping("T-1").is_none());
    assert!(manager.mapping("T-2").is_some());
    assert!(GitEngine::new(repo.path()).branch_exists("task/T-2-two"));
}

/// A protected branch is never a cleanup candidate, even when its task is
/// inactive; its mapping stays too.
#[test]
fn cleanup_orphans_skips_protected_branches() {
    let repo = TestRepo::new().expect("repo");
    let mut manager = manager(&repo);
    let mut config = basic_config();
    config
        .protected_branches
        .push("task/T-1-one".to_string());

    manager.handle_status_change(
        &sample_task("T-1", "One"),
        TaskStatus::Backlog,
        TaskStatus::Doing,
        &config,
    );
    repo.git(&["checkout", "main"]).expect("checkout");

    let deleted = manager
        .cleanup_orphans(&BTreeSet::new(), &config)
        .expect("cleanup");
    assert!(deleted.is_empty());
    assert!(GitEngine::new(repo.path()).branch_exists("task/T-1-one"));
    assert!(manager.mapping("T-1").is_some());
}

/// Detaching removes the mapping but leaves the branch intact.
#[test]
fn detach_keeps_the_branch() {
    let repo = TestRepo::new().expect("repo");
    let mut manager = manager(&repo);
    let config = basic_config();
    manager.handle_status_change(
        &sample_task("T-1", "One"),
        TaskStatus::Backlog,
        TaskStatus::Doing,
        &config,
    );

    let result = manager.detach_task("T-1");
    assert!(result.success);
    assert!(manager.mapping("T-1").is_none());
    assert!(GitEngine::new(repo.path()).branch_exists("task/T-1-one"));

    assert!(!manager.detach_task("T-1").success);
}

/// Sync drops mappings for branches deleted out-of-band and recomputes
/// the checked-out flag from the real current branch.
#[test]
fn sync_heals_out_of_band_drift() {
    let repo = TestRepo::new().expect("repo");
    let mut manager = manager(&repo);
    let config = basic_config();
    manager.handle_status_change(
        &sample_task("T-1", "One"),
        TaskStatus::Backlog,
        TaskStatus::Doing,
        &config,
    );
    manager.handle_status_change(
        &sample_task("T-2", "Two"),
        TaskStatus::Backlog,
        TaskStatus::Doing,
        &config,
    );

    // Out-of-band: return to the first task branch and delete the second.
    repo.git(&["checkout", "task/T-1-one"]).expect("checkout");
    repo.git(&["branch", "-D", "task/T-2-two"]).expect("delete");

    let dropped = manager.sync_with_git_branches().expect("sync");
    assert_eq!(dropped, 1);
    assert!(manager.mapping("T-2").is_none());
    assert!(manager.mapping("T-1").expect("mapping").is_checked_out);
}

/// The operation log records commands with task attribution and supports
/// filtered retrieval.
#[test]
fn operation_log_records_and_filters() {
    let repo = TestRepo::new().expect("repo");
    let mut manager = manager(&repo);
    let config = advanced_config();

    manager.handle_status_change(
        &sample_task("T-1", "Add login"),
        TaskStatus::Backlog,
        TaskStatus::Doing,
        &config,
    );
    assert!(!manager.state().operation_log.is_empty());

    let all = manager.operation_logs(10, None);
    assert!(all.iter().any(|entry| entry.command.contains("checkout")));
    let for_task = manager.operation_logs(10, Some("T-1"));
    assert_eq!(all.len(), for_task.len());
    assert!(for_task
        .iter()
        .all(|entry| entry.task_id.as_deref() == Some("T-1")));
    assert!(manager.operation_logs(10, Some("T-9")).is_empty());

    // Newest first.
    let newest = manager.operation_logs(1, None);
    assert_eq!(
        newest[0].command,
        manager.state().operation_log.last().expect("entry").command
    );
}
