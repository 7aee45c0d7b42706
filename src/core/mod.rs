//! Pure, deterministic logic for the task-branch core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod branch_name;
pub mod safety;
pub mod state;
pub mod transition;
pub mod types;
