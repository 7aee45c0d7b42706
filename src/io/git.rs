//! Git subprocess engine for a single project root.
//!
//! Stateless wrapper translating domain operations into `git` invocations
//! with bounded waits. Ordinary command failure (non-zero exit) is reported
//! through [`ExecResult`], never as an `Err`; spawn failures are folded into
//! the same shape. Typed queries parse command output and surface a failed
//! subcommand as an error built from stderr.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::branch_name::extract_task_id;
use crate::core::types::{
    BranchInfo, CommitInfo, ConflictInfo, ConflictStatus, ConflictType, GitConfig, MergeOutcome,
    RepositoryStatus, Resolution,
};
use super::process::run_command_with_timeout;

/// Per-call wait for local commands.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-call wait for commands that talk to a remote.
pub const NETWORK_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-stream capture bound at the process layer. The operation log applies
/// its own, tighter cap.
const OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;

/// Uniform result of one git invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Rendered command line, e.g. `git checkout main`.
    pub command: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed or never spawned.
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ExecResult {
    /// Best human-readable failure description.
    pub fn error_message(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        "git command failed".to_string()
    }
}

/// Wrapper for executing git commands against a fixed project root.
#[derive(Debug, Clone)]
pub struct GitEngine {
    root: PathBuf,
    timeout: Duration,
    network_timeout: Duration,
}

impl GitEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            timeout: DEFAULT_TIMEOUT,
            network_timeout: NETWORK_TIMEOUT,
        }
    }

    /// Override both timeouts (tests use short waits).
    pub fn with_timeouts(mut self, timeout: Duration, network_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.network_timeout = network_timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run a local git command. Never fails: spawn errors and timeouts are
    /// folded into the result.
    pub fn run(&self, args: &[&str]) -> ExecResult {
        self.run_with(args, self.timeout)
    }

    /// Run a git command that may reach a remote (longer wait).
    pub fn run_network(&self, args: &[&str]) -> ExecResult {
        self.run_with(args, self.network_timeout)
    }

    fn run_with(&self, args: &[&str], timeout: Duration) -> ExecResult {
        let command = format!("git {}", args.join(" "));
        debug!(%command, "running git command");
        let start = Instant::now();
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.root);
        match run_command_with_timeout(cmd, timeout, OUTPUT_LIMIT_BYTES) {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout).to_string();
                let stderr = String::from_utf8_lossy(&out.stderr).to_string();
                let success = out.status.success() && !out.timed_out;
                let error = if out.timed_out {
                    Some(format!("timed out after {}s", timeout.as_secs()))
                } else if success {
                    None
                } else {
                    let trimmed = stderr.trim();
                    Some(if trimmed.is_empty() {
                        format!("exited with status {:?}", out.status.code())
                    } else {
                        trimmed.to_string()
                    })
                };
                ExecResult {
                    command,
                    success,
                    stdout,
                    stderr,
                    exit_code: out.status.code(),
                    error,
                    timed_out: out.timed_out,
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
            Err(err) => {
                warn!(%command, err = %err, "failed to spawn git");
                ExecResult {
                    command,
                    success: false,
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: None,
                    error: Some(format!("{err:#}")),
                    timed_out: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
        }
    }

    fn checked(&self, result: ExecResult) -> Result<ExecResult> {
        if result.success {
            Ok(result)
        } else {
            Err(anyhow!(
                "{} failed: {}",
                result.command,
                result.error_message()
            ))
        }
    }

    fn capture(&self, args: &[&str]) -> Result<String> {
        Ok(self.checked(self.run(args))?.stdout)
    }

    // ---- existence and bootstrap ----

    pub fn is_repository(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"]).success
    }

    pub fn init_repository(&self, default_branch: &str) -> ExecResult {
        self.run(&["init", "-b", default_branch])
    }

    pub fn repo_root(&self) -> Result<PathBuf> {
        let out = self.capture(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    // ---- status ----

    /// Current branch name, `None` on detached HEAD.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let out = self.capture(&["branch", "--show-current"])?;
        let name = out.trim();
        if name.is_empty() {
            Ok(None)
        } else {
            Ok(Some(name.to_string()))
        }
    }

    /// Snapshot of the working tree and repo metadata.
    #[instrument(skip_all)]
    pub fn status(&self) -> Result<RepositoryStatus> {
        if !self.is_repository() {
            return Ok(RepositoryStatus::not_a_repo());
        }
        let current_branch = self.current_branch()?;
        let porcelain = self.capture(&["status", "--porcelain=v1", "-uall"])?;
        let counts = parse_porcelain(&porcelain);

        // No upstream configured is the common case; default to 0/0.
        let upstream = self.run(&["rev-list", "--left-right", "--count", "@{upstream}...HEAD"]);
        let (ahead, behind) = if upstream.success {
            parse_ahead_behind(&upstream.stdout).unwrap_or((0, 0))
        } else {
            (0, 0)
        };

        let git_dir = self.git_dir()?;
        let is_merging = git_dir.join("MERGE_HEAD").exists();
        let is_rebasing =
            git_dir.join("rebase-merge").exists() || git_dir.join("rebase-apply").exists();

        Ok(RepositoryStatus {
            is_repo: true,
            current_branch,
            staged: counts.staged,
            modified: counts.modified,
            untracked: counts.untracked,
            ahead,
            behind,
            is_merging,
            is_rebasing,
        })
    }

    /// Metadata directory, resolved so worktrees (where `.git` is a file)
    /// are handled.
    fn git_dir(&self) -> Result<PathBuf> {
        let out = self.capture(&["rev-parse", "--git-dir"])?;
        let dir = PathBuf::from(out.trim());
        if dir.is_absolute() {
            Ok(dir)
        } else {
            Ok(self.root.join(dir))
        }
    }

    // ---- branches ----

    pub fn list_branches(&self, include_remote: bool) -> Result<Vec<BranchInfo>> {
        let current = self.current_branch()?;
        let format = "%(refname:short)|%(objectname:short)|%(committerdate:iso8601)|%(contents:subject)";
        let format_arg = format!("--format={format}");

        let mut branches = Vec::new();
        let local = self.capture(&["for-each-ref", &format_arg, "refs/heads"])?;
        for line in local.lines() {
            if let Some(branch) = parse_branch_line(line, current.as_deref(), false) {
                branches.push(branch);
            }
        }
        if include_remote {
            let remote = self.capture(&["for-each-ref", &format_arg, "refs/remotes"])?;
            for line in remote.lines() {
                if let Some(branch) = parse_branch_line(line, current.as_deref(), true) {
                    branches.push(branch);
                }
            }
        }
        Ok(branches)
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.run(&[
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{name}"),
        ])
        .success
    }

    /// Create `name` at `base` without checking it out.
    pub fn create_branch(&self, name: &str, base: &str) -> ExecResult {
        self.run(&["branch", name, base])
    }

    pub fn checkout_branch(&self, name: &str) -> ExecResult {
        self.run(&["checkout", name])
    }

    pub fn delete_branch(&self, name: &str, force: bool) -> ExecResult {
        let flag = if force { "-D" } else { "-d" };
        self.run(&["branch", flag, name])
    }

    pub fn rename_branch(&self, old: &str, new: &str) -> ExecResult {
        self.run(&["branch", "-m", old, new])
    }

    // ---- staging and commits ----

    pub fn stage_files(&self, paths: &[&str]) -> ExecResult {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.run(&args)
    }

    /// Stage all changes (respects .gitignore).
    pub fn stage_all(&self) -> ExecResult {
        self.run(&["add", "-A"])
    }

    pub fn unstage_files(&self, paths: &[&str]) -> ExecResult {
        let mut args = vec!["reset", "HEAD", "--"];
        args.extend_from_slice(paths);
        self.run(&args)
    }

    pub fn commit(&self, message: &str, amend: bool) -> ExecResult {
        let mut args = vec!["commit", "-m", message];
        if amend {
            args.push("--amend");
        }
        self.run(&args)
    }

    pub fn head_commit(&self) -> Result<String> {
        self.rev_parse("HEAD")
    }

    pub fn rev_parse(&self, reference: &str) -> Result<String> {
        let out = self.capture(&["rev-parse", reference])?;
        Ok(out.trim().to_string())
    }

    pub fn commit_history(&self, count: usize, branch: Option<&str>) -> Result<Vec<CommitInfo>> {
        let count_arg = count.to_string();
        let mut args = vec!["log", "--format=%H|%aI|%s", "-n", &count_arg];
        if let Some(branch) = branch {
            args.push(branch);
        }
        let out = self.capture(&args)?;
        Ok(out.lines().filter_map(parse_commit_line).collect())
    }

    // ---- merging ----

    /// Merge `branch` into the current branch, returning a structured
    /// outcome. A conflicted merge is a value, not an error; the index is
    /// left mid-merge for the caller to resolve or abort.
    #[instrument(skip_all, fields(branch))]
    pub fn merge_branch(
        &self,
        branch: &str,
        no_commit: bool,
        message: Option<&str>,
    ) -> Result<MergeOutcome> {
        let result = self.merge_raw(branch, no_commit, message);
        self.merge_outcome(&result, no_commit)
    }

    /// The raw merge invocation, exposed so callers that keep an operation
    /// log can record it before interpreting the outcome.
    pub fn merge_raw(&self, branch: &str, no_commit: bool, message: Option<&str>) -> ExecResult {
        let mut args = vec!["merge", "--no-ff"];
        if no_commit {
            args.push("--no-commit");
        }
        if let Some(message) = message {
            args.push("-m");
            args.push(message);
        }
        args.push(branch);
        self.run(&args)
    }

    /// Interpret a merge invocation's result, enumerating conflicts when
    /// the output carries a conflict marker.
    pub fn merge_outcome(&self, result: &ExecResult, no_commit: bool) -> Result<MergeOutcome> {
        if result.success {
            let merge_commit_hash = if no_commit {
                None
            } else {
                self.head_commit().ok()
            };
            return Ok(MergeOutcome {
                success: true,
                had_conflicts: false,
                conflicts: Vec::new(),
                merge_commit_hash,
                error: None,
            });
        }
        if merge_output_indicates_conflict(&result.stdout, &result.stderr) {
            let conflicts = self.conflicts()?;
            warn!(count = conflicts.len(), "merge produced conflicts");
            return Ok(MergeOutcome {
                success: false,
                had_conflicts: true,
                conflicts,
                merge_commit_hash: None,
                error: Some("merge conflicts detected".to_string()),
            });
        }
        Ok(MergeOutcome {
            success: false,
            had_conflicts: false,
            conflicts: Vec::new(),
            merge_commit_hash: None,
            error: Some(result.error_message()),
        })
    }

    pub fn abort_merge(&self) -> ExecResult {
        self.run(&["merge", "--abort"])
    }

    /// Enumerate conflicted paths with three-way content.
    pub fn conflicts(&self) -> Result<Vec<ConflictInfo>> {
        let out = self.capture(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|path| self.conflict_info(path))
            .collect())
    }

    fn conflict_info(&self, path: &str) -> ConflictInfo {
        let is_binary = self.path_is_binary(path);
        let (ours_content, theirs_content, base_content) = if is_binary {
            (None, None, None)
        } else {
            (
                self.show_stage(2, path),
                self.show_stage(3, path),
                self.show_stage(1, path),
            )
        };
        let file_size = fs::metadata(self.root.join(path))
            .map(|meta| meta.len())
            .unwrap_or(0);
        ConflictInfo {
            file_path: path.to_string(),
            conflict_type: if is_binary {
                ConflictType::Binary
            } else {
                ConflictType::Content
            },
            is_binary,
            ours_content,
            theirs_content,
            base_content,
            status: ConflictStatus::Unresolved,
            file_size,
        }
    }

    /// Index stage content (1=base, 2=ours, 3=theirs); `None` when the
    /// stage is absent (e.g. add/add conflicts have no base).
    fn show_stage(&self, stage: u8, path: &str) -> Option<String> {
        let result = self.run(&["show", &format!(":{stage}:{path}")]);
        if result.success {
            Some(result.stdout)
        } else {
            None
        }
    }

    /// Heuristic binary classification: a numstat diff of the working file
    /// against an empty file reports `-` counts for binary content. Exit
    /// code 1 only means the files differ; anything else fails open to
    /// binary. Known limitation, not a guarantee.
    fn path_is_binary(&self, path: &str) -> bool {
        let result = self.run(&["diff", "--no-index", "--numstat", "/dev/null", path]);
        if result.exit_code.is_none_or(|code| code > 1) {
            return true;
        }
        result
            .stdout
            .lines()
            .next()
            .map(|line| line.starts_with('-'))
            .unwrap_or(false)
    }

    /// Apply one resolution choice and stage the path.
    #[instrument(skip_all, fields(path))]
    pub fn resolve_conflict(&self, path: &str, resolution: &Resolution) -> Result<()> {
        match resolution {
            Resolution::Ours => {
                self.checked(self.run(&["checkout", "--ours", "--", path]))?;
            }
            Resolution::Theirs => {
                self.checked(self.run(&["checkout", "--theirs", "--", path]))?;
            }
            Resolution::Manual(content) => {
                fs::write(self.root.join(path), content)
                    .with_context(|| format!("write resolved file {path}"))?;
            }
        }
        self.checked(self.run(&["add", "--", path]))?;
        debug!("conflict resolved and staged");
        Ok(())
    }

    // ---- remotes ----

    /// Push to the remote. With an explicit branch, the `origin` remote is
    /// assumed; without one, git pushes the current branch to its
    /// configured upstream.
    pub fn push(&self, branch: Option<&str>, force: bool) -> ExecResult {
        let mut args = vec!["push"];
        if force {
            args.push("--force");
        }
        if let Some(branch) = branch {
            args.push("origin");
            args.push(branch);
        }
        self.run_network(&args)
    }

    pub fn pull(&self) -> ExecResult {
        self.run_network(&["pull"])
    }

    pub fn fetch(&self) -> ExecResult {
        self.run_network(&["fetch", "--prune"])
    }

    // ---- stash ----

    pub fn stash(&self, message: Option<&str>) -> ExecResult {
        let mut args = vec!["stash", "push"];
        if let Some(message) = message {
            args.push("-m");
            args.push(message);
        }
        self.run(&args)
    }

    pub fn stash_pop(&self) -> ExecResult {
        self.run(&["stash", "pop"])
    }

    pub fn stash_list(&self) -> Result<Vec<String>> {
        let out = self.capture(&["stash", "list"])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    // ---- diffs ----

    pub fn staged_diff(&self) -> Result<String> {
        self.capture(&["diff", "--cached"])
    }

    pub fn unstaged_diff(&self) -> Result<String> {
        self.capture(&["diff"])
    }

    pub fn diff(&self, from: &str, to: &str) -> Result<String> {
        self.capture(&["diff", &format!("{from}..{to}")])
    }

    // ---- maintenance ----

    /// Local task-pattern branches whose task id is not in `active_task_ids`
    /// and which are not checked out. Protected names are never candidates.
    pub fn orphan_branches(
        &self,
        active_task_ids: &BTreeSet<String>,
        config: &GitConfig,
    ) -> Result<Vec<String>> {
        let branches = self.list_branches(false)?;
        Ok(branches
            .into_iter()
            .filter(|branch| !branch.is_current)
            .filter(|branch| {
                if config.is_protected(&branch.name) {
                    warn!(branch = %branch.name, "skipping protected branch during cleanup");
                    return false;
                }
                true
            })
            .filter(|branch| {
                branch
                    .task_id
                    .as_ref()
                    .is_some_and(|id| !active_task_ids.contains(id))
            })
            .map(|branch| branch.name)
            .collect())
    }

    /// Delete orphaned task branches; best-effort, a failed delete is
    /// skipped. Returns the deleted names.
    #[instrument(skip_all)]
    pub fn cleanup_orphan_branches(
        &self,
        active_task_ids: &BTreeSet<String>,
        config: &GitConfig,
    ) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for name in self.orphan_branches(active_task_ids, config)? {
            let result = self.delete_branch(&name, true);
            if result.success {
                debug!(branch = %name, "deleted orphan branch");
                deleted.push(name);
            } else {
                warn!(branch = %name, error = %result.error_message(), "skipping orphan branch");
            }
        }
        Ok(deleted)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct StatusCounts {
    staged: usize,
    modified: usize,
    untracked: usize,
}

fn parse_porcelain(output: &str) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for line in output.lines() {
        if line.len() < 2 {
            continue;
        }
        if line.starts_with("??") {
            counts.untracked += 1;
            continue;
        }
        let mut chars = line.chars();
        let x = chars.next().unwrap_or(' ');
        let y = chars.next().unwrap_or(' ');
        if x != ' ' {
            counts.staged += 1;
        }
        if y != ' ' {
            counts.modified += 1;
        }
    }
    counts
}

/// Parse `rev-list --left-right --count @{upstream}...HEAD` into
/// `(ahead, behind)`. Left side counts upstream-only commits.
fn parse_ahead_behind(output: &str) -> Option<(usize, usize)> {
    let mut parts = output.split_whitespace();
    let behind = parts.next()?.parse().ok()?;
    let ahead = parts.next()?.parse().ok()?;
    Some((ahead, behind))
}

fn parse_branch_line(line: &str, current: Option<&str>, is_remote: bool) -> Option<BranchInfo> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut parts = line.splitn(4, '|');
    let name = parts.next()?.trim().to_string();
    if is_remote && name.ends_with("/HEAD") {
        return None;
    }
    let hash = parts.next().map(str::trim).filter(|s| !s.is_empty());
    let date = parts.next().map(str::trim).filter(|s| !s.is_empty());
    let subject = parts.next().map(str::trim).filter(|s| !s.is_empty());

    // Remote names carry a `{remote}/` prefix before the branch pattern.
    let pattern_name = if is_remote {
        name.split_once('/').map(|(_, rest)| rest).unwrap_or(&name)
    } else {
        name.as_str()
    };
    Some(BranchInfo {
        task_id: extract_task_id(pattern_name),
        is_current: !is_remote && current == Some(name.as_str()),
        is_remote,
        name,
        last_commit_hash: hash.map(str::to_string),
        last_commit_date: date.map(str::to_string),
        last_commit_message: subject.map(str::to_string),
    })
}

fn parse_commit_line(line: &str) -> Option<CommitInfo> {
    let mut parts = line.splitn(3, '|');
    let hash = parts.next()?.trim();
    if hash.is_empty() {
        return None;
    }
    Some(CommitInfo {
        hash: hash.to_string(),
        date: parts.next().unwrap_or("").trim().to_string(),
        subject: parts.next().unwrap_or("").trim().to_string(),
    })
}

fn merge_output_indicates_conflict(stdout: &str, stderr: &str) -> bool {
    stdout.contains("CONFLICT")
        || stderr.contains("CONFLICT")
        || stdout.contains("Automatic merge failed")
        || stderr.contains("Automatic merge failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_counts_staged_modified_untracked() {
        let output = "M  staged.rs\n M modified.rs\nMM both.rs\n?? new.rs\n";
        let counts = parse_porcelain(output);
        assert_eq!(
            counts,
            StatusCounts {
                staged: 2,
                modified: 2,
                untracked: 1
            }
        );
    }

    #[test]
    fn porcelain_ignores_blank_lines() {
        assert_eq!(parse_porcelain("\n\n"), StatusCounts::default());
    }

    #[test]
    fn ahead_behind_parses_left_right_counts() {
        assert_eq!(parse_ahead_behind("2\t5\n"), Some((5, 2)));
        assert_eq!(parse_ahead_behind("garbage"), None);
    }

    #[test]
    fn branch_line_extracts_task_id_and_current() {
        let branch = parse_branch_line(
            "task/T-1-add-login|abc1234|2025-01-01 10:00:00 +0000|feat: login",
            Some("task/T-1-add-login"),
            false,
        )
        .expect("branch");
        assert_eq!(branch.name, "task/T-1-add-login");
        assert!(branch.is_current);
        assert!(!branch.is_remote);
        assert_eq!(branch.task_id.as_deref(), Some("T-1"));
        assert_eq!(branch.last_commit_hash.as_deref(), Some("abc1234"));
        assert_eq!(branch.last_commit_message.as_deref(), Some("feat: login"));
    }

    #[test]
    fn remote_branch_line_strips_remote_for_task_id() {
        let branch = parse_branch_line(
            "origin/task/T-7-thing|abc|2025-01-01|msg",
            Some("main"),
            true,
        )
        .expect("branch");
        assert!(branch.is_remote);
        assert!(!branch.is_current);
        assert_eq!(branch.task_id.as_deref(), Some("T-7"));
    }

    #[test]
    fn remote_head_pointer_is_skipped() {
        assert!(parse_branch_line("origin/HEAD|abc|date|msg", None, true).is_none());
    }

    #[test]
    fn commit_line_parses_three_fields() {
        let commit = parse_commit_line("deadbeef|2025-06-01T10:00:00+02:00|fix: things")
            .expect("commit");
        assert_eq!(commit.hash, "deadbeef");
        assert_eq!(commit.subject, "fix: things");
    }

    #[test]
    fn conflict_marker_detection() {
        assert!(merge_output_indicates_conflict(
            "CONFLICT (content): Merge conflict in src/app.ts\nAutomatic merge failed;",
            ""
        ));
        assert!(!merge_output_indicates_conflict(
            "",
            "fatal: not something we can merge"
        ));
    }
}
