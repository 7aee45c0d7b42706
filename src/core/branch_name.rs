//! Branch naming: slug generation, convention templates, and task id
//! extraction from branch names.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum characters kept from a slugified title.
pub const MAX_SLUG_CHARS: usize = 50;

/// Fixed `task/{ID}-...` pattern for recognizing task branches, independent
/// of the configured convention. Case-insensitive, first match only.
static TASK_BRANCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^task/([A-Za-z][A-Za-z0-9]*-\d+|\d+)").expect("valid regex"));

/// Lowercase a title into a hyphenated slug capped at [`MAX_SLUG_CHARS`].
///
/// Non-alphanumeric runs collapse to a single hyphen; edge hyphens are
/// trimmed after truncation so the slug never ends on a separator.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut pending_hyphen = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    let truncated: String = slug.chars().take(MAX_SLUG_CHARS).collect();
    truncated.trim_matches('-').to_string()
}

/// Render a branch name from the convention template.
///
/// Substitutes `{taskId}` and `{slug}`; a trailing separator left by an
/// empty slug is trimmed.
pub fn generate(task_id: &str, title: &str, convention: &str) -> String {
    let name = convention
        .replace("{taskId}", task_id)
        .replace("{slug}", &slugify(title));
    name.trim_end_matches('-').to_string()
}

/// Extract a task id from a branch named under the `task/{ID}-...` pattern.
pub fn extract_task_id(branch: &str) -> Option<String> {
    TASK_BRANCH_RE
        .captures(branch)
        .map(|captures| captures[1].to_string())
}
