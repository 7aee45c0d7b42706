//! Side-effecting operations: git subprocess execution and the state and
//! config files.

pub mod config;
pub mod git;
pub mod process;
pub mod state_store;
