//! Git automation configuration stored under `.taskbranch/config.toml`.
//!
//! The lifecycle manager itself treats [`GitConfig`] as read-only per-call
//! input; this module is the loader hosts use to supply it. Missing file
//! defaults to the standard configuration.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::types::GitConfig;

/// Load config from a TOML file.
///
/// If the file is missing, returns `GitConfig::default()`.
pub fn load_config(path: &Path) -> Result<GitConfig> {
    if !path.exists() {
        let config = GitConfig::default();
        config.validate()?;
        return Ok(config);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let config: GitConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, config: &GitConfig) -> Result<()> {
    config.validate()?;
    let mut buf = toml::to_string_pretty(config).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
