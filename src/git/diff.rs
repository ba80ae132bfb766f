//! Diff computation against an instance's base commit.
//!
//! Deliberately simpler than a full `--numstat`-based accounting: `git add
//! -N .` registers untracked files as intent-to-add so they show up in the
//! diff against `base_commit`, then the output is scanned line-by-line for
//! a leading `+`/`-`, excluding the `+++`/`---` file headers.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cmd::Cmd;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffStats {
    pub added: u64,
    pub removed: u64,
    pub content: String,
    /// Non-fatal setup problem (e.g. base commit not yet known) surfaced
    /// alongside the stats rather than as a hard error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DiffStats {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Compute `DiffStats` for `worktree_path` against `base_commit`.
///
/// Transient failures (the worktree directory vanished mid-call, `cd`
/// failed) are swallowed and reported as an empty result, not as an
/// `Err`, since callers (the metadata ticker) must never treat a vanished
/// worktree as a reason to stop ticking its siblings.
pub fn compute_diff(worktree_path: &Path, base_commit: &str) -> DiffStats {
    if base_commit.is_empty() {
        return DiffStats::empty();
    }
    if !worktree_path.exists() {
        debug!(path = %worktree_path.display(), "diff: worktree vanished, returning empty");
        return DiffStats::empty();
    }

    // Register untracked files as intent-to-add so `git diff` includes
    // them; best-effort, a failure here still lets us try the diff itself.
    let _ = Cmd::new("git")
        .workdir(worktree_path)
        .args(&["add", "-N", "."])
        .run();

    let diff_output = match Cmd::new("git")
        .workdir(worktree_path)
        .args(&["--no-pager", "diff", base_commit])
        .run_and_capture_stdout()
    {
        Ok(output) => output,
        Err(e) => {
            let message = e.to_string();
            if looks_transient(&message) {
                warn!(error = %message, "diff: transient failure, returning empty");
                return DiffStats::empty();
            }
            return DiffStats::with_error(message);
        }
    };

    let (added, removed) = count_plus_minus_lines(&diff_output);
    DiffStats {
        added,
        removed,
        content: diff_output,
        error: None,
    }
}

fn looks_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("no such file or directory")
        || lower.contains("cannot change to")
        || lower.contains("not a git repository")
}

/// Plain prefix scan: a line starting with `+` (not `+++`) counts as
/// added, `-` (not `---`) counts as removed. This intentionally ignores
/// hunk headers, binary markers, and no-newline-at-eof markers.
fn count_plus_minus_lines(diff: &str) -> (u64, u64) {
    let mut added = 0u64;
    let mut removed = 0u64;
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if line.starts_with('+') {
            added += 1;
        } else if line.starts_with('-') {
            removed += 1;
        }
    }
    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_base_commit_yields_empty_stats() {
        let stats = compute_diff(Path::new("/does/not/matter"), "");
        assert_eq!(stats, DiffStats::empty());
    }

    #[test]
    fn missing_worktree_path_yields_empty_stats() {
        let stats = compute_diff(Path::new("/definitely/not/a/real/path/xyz"), "deadbeef");
        assert_eq!(stats, DiffStats::empty());
    }

    #[test]
    fn counts_plus_minus_lines_excluding_file_headers() {
        let diff = "diff --git a/f b/f\n--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n-old line\n+new line\n+another new line\n";
        let (added, removed) = count_plus_minus_lines(diff);
        assert_eq!(added, 2);
        assert_eq!(removed, 1);
    }

    #[test]
    fn ignores_context_and_no_newline_markers() {
        let diff = " context line\n\\ No newline at end of file\n+added\n";
        let (added, removed) = count_plus_minus_lines(diff);
        assert_eq!(added, 1);
        assert_eq!(removed, 0);
    }

    #[test]
    fn diff_stats_added_removed_are_never_negative_by_construction() {
        // added/removed are u64: the type system enforces the
        // `added >= 0 && removed >= 0` invariant from the testable
        // properties section.
        let stats = DiffStats::empty();
        let _: u64 = stats.added;
        let _: u64 = stats.removed;
    }
}
