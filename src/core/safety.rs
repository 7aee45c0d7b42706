//! Pre-flight safety checks over the current repository status.
//!
//! Pure function over `(operation, status, config)`. Blockers stop an
//! operation outright; warnings flag conditions the caller may proceed
//! past. Each finding comes with a suggestion.

use crate::core::types::{GitConfig, RepositoryStatus};

/// Operation about to be attempted against the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyOperation<'a> {
    Checkout,
    Merge,
    Push {
        force: bool,
        /// Explicit push target; `None` pushes the current branch.
        target: Option<&'a str>,
    },
    Pull,
    DeleteBranch { branch: &'a str },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SafetyReport {
    pub safe: bool,
    pub warnings: Vec<String>,
    pub blockers: Vec<String>,
    pub suggestions: Vec<String>,
}

pub fn run_safety_check(
    operation: &SafetyOperation<'_>,
    status: &RepositoryStatus,
    config: &GitConfig,
) -> SafetyReport {
    let mut report = SafetyReport::default();

    if status.is_merging {
        report.blockers.push("a merge is in progress".to_string());
        report
            .suggestions
            .push("finish or abort the merge before continuing".to_string());
    }
    if status.is_rebasing {
        report.blockers.push("a rebase is in progress".to_string());
        report
            .suggestions
            .push("finish or abort the rebase before continuing".to_string());
    }

    match operation {
        SafetyOperation::Checkout | SafetyOperation::Merge => {
            if status.is_dirty() {
                report
                    .warnings
                    .push("working tree has uncommitted changes".to_string());
                report
                    .suggestions
                    .push("commit or stash changes first".to_string());
            }
        }
        SafetyOperation::Push { force, target } => {
            if status.behind > 0 {
                report.warnings.push(format!(
                    "branch is {} commit(s) behind its upstream",
                    status.behind
                ));
                report
                    .suggestions
                    .push("pull the latest changes before pushing".to_string());
            }
            if *force
                && let Some(branch) = target.or(status.current_branch.as_deref())
                && config.is_protected(branch)
            {
                report
                    .blockers
                    .push(format!("'{branch}' is protected against force-push"));
                report
                    .suggestions
                    .push("push without --force or use a different branch".to_string());
            }
        }
        SafetyOperation::Pull => {}
        SafetyOperation::DeleteBranch { branch } => {
            if config.is_protected(branch) {
                report
                    .blockers
                    .push(format!("'{branch}' is protected against deletion"));
                report
                    .suggestions
                    .push("remove the branch from protected_branches first".to_string());
            }
        }
    }

    report.safe = report.blockers.is_empty();
    report
}
