//! Lifecycle state storage (`.taskbranch/git-state.json`).
//!
//! The state file is rewritten wholesale on every mutation. A missing file
//! is an empty initial state; a corrupt file is logged and replaced with a
//! safe default rather than propagated.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::state::LifecycleState;

/// Directory holding taskbranch-owned files within a project.
pub const STATE_DIR: &str = ".taskbranch";
const STATE_FILE: &str = "git-state.json";

/// Canonical state file path for a project root.
pub fn state_path(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR).join(STATE_FILE)
}

/// Load lifecycle state from disk. Missing file yields the empty state;
/// a corrupt file is replaced with the empty state.
pub fn load_state(path: &Path) -> LifecycleState {
    if !path.exists() {
        debug!(path = %path.display(), "no state file, starting empty");
        return LifecycleState::default();
    }
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "unreadable state file, starting empty");
            return LifecycleState::default();
        }
    };
    match serde_json::from_str(&contents) {
        Ok(state) => {
            debug!(path = %path.display(), "state loaded");
            state
        }
        Err(err) => {
            warn!(path = %path.display(), err = %err, "corrupt state file, starting empty");
            LifecycleState::default()
        }
    }
}

/// Atomically write lifecycle state to disk (temp file + rename).
pub fn write_state(path: &Path, state: &LifecycleState) -> Result<()> {
    debug!(path = %path.display(), mappings = state.mappings.len(), "writing state");
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    // The state dir must never be swept into task commits by stage-all.
    let gitignore = parent.join(".gitignore");
    if !gitignore.exists() {
        fs::write(&gitignore, "*\n")
            .with_context(|| format!("write {}", gitignore.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace state {}", path.display()))?;
    Ok(())
}
