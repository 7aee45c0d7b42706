//! Status-transition classification.
//!
//! The pure half of the state machine: maps a `(from, to)` status pair to
//! the branch action it requires. The lifecycle manager owns the side
//! effects.

use crate::core::types::TaskStatus;

/// Branch action implied by a task status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Create (or re-checkout) the task branch.
    StartWork,
    /// Commit pending work and stage it into the review branch.
    MoveToReview,
    /// Merge the task branch to main and retire it.
    Complete,
    /// Return to the task branch after review.
    RevertFromReview,
    /// No branch side effects.
    Ignore,
}

pub fn classify(from: TaskStatus, to: TaskStatus) -> TransitionKind {
    use TaskStatus as S;
    match (from, to) {
        (S::Backlog | S::Todo, S::Doing) => TransitionKind::StartWork,
        (S::Doing, S::Review) => TransitionKind::MoveToReview,
        (S::Review, S::Done) => TransitionKind::Complete,
        (S::Review, S::Doing) => TransitionKind::RevertFromReview,
        _ => TransitionKind::Ignore,
    }
}
