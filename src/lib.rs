//! Task-branch lifecycle core.
//!
//! This crate automates the relationship between a work item ("task") and a
//! git branch: branch creation when work starts, checkout on resume, commit
//! and staging-branch merges on review, merge-to-main on completion, and
//! conflict surfacing when automation cannot proceed. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (transition classification,
//!   branch naming, safety checks, persisted state model). No I/O, fully
//!   testable in isolation.
//! - **[`io`]**: Side-effecting operations (git subprocess execution with
//!   timeouts, state/config files). Isolated to enable fixtures in tests.
//!
//! The orchestration module ([`lifecycle`]) coordinates core logic with I/O
//! to implement the task-status state machine.

pub mod core;
pub mod io;
pub mod lifecycle;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
