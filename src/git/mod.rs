//! Git plumbing: worktree CRUD, branch operations, diff computation, and
//! the cleanup-with-verify retry loop. Everything here talks either to a
//! local `git` executable (via `crate::cmd::Cmd`) or to `git2` for the
//! library-level half of cleanup-with-verify.

pub mod branch;
pub mod cleanup;
pub mod diff;
pub mod worktree;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("no worktree found for '{0}'")]
pub struct WorktreeNotFound(pub String);

pub use branch::{branch_exists, is_branch_checked_out_elsewhere};
pub use cleanup::cleanup_worktree;
pub use diff::{DiffStats, compute_diff};
pub use worktree::{create_worktree, find_worktree_by_session, get_main_worktree_root};

use anyhow::{Context, Result};
use std::path::Path;

use crate::cmd::Cmd;

/// `git rev-parse HEAD` in `repo_path`.
pub fn rev_parse_head(repo_path: &Path) -> Result<String> {
    Cmd::new("git")
        .workdir(repo_path)
        .args(&["rev-parse", "HEAD"])
        .run_and_capture_stdout()
        .context("failed to resolve HEAD")
}

/// Whether `repo_path` has at least one commit. A brand-new repository
/// with no commits cannot be branched from, which the worktree manager
/// reports as a dedicated setup error.
pub fn has_commits(repo_path: &Path) -> Result<bool> {
    Ok(Cmd::new("git")
        .workdir(repo_path)
        .args(&["rev-parse", "--verify", "HEAD"])
        .run_as_check()
        .unwrap_or(false))
}

pub fn is_git_repo(path: &Path) -> bool {
    Cmd::new("git")
        .workdir(path)
        .args(&["rev-parse", "--is-inside-work-tree"])
        .run_as_check()
        .unwrap_or(false)
}
