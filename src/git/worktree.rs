//! Worktree CRUD via the `git` CLI.
//!
//! Adapted from the worktree-add/list/prune primitives of a tmux+worktree
//! orchestrator this codebase is descended from, trimmed to the
//! single-branch-per-worktree model the supervision core uses: each
//! `WorktreeHandle` owns exactly one worktree, named after the instance's
//! multiplexer session, so handle/branch/worktree resolution never needs
//! the directory-vs-branch disambiguation a multi-worktree-per-branch tool
//! would need.

use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

use crate::cmd::Cmd;

use super::WorktreeNotFound;

/// Create a new worktree at `worktree_path`. If `create_branch` is set, a
/// new branch `branch_name` is created from `base` (or HEAD if `base` is
/// `None`); otherwise the worktree checks out an existing branch.
pub fn create_worktree(
    repo_path: &Path,
    worktree_path: &Path,
    branch_name: &str,
    create_branch: bool,
    base: Option<&str>,
) -> Result<()> {
    let path_str = worktree_path
        .to_str()
        .ok_or_else(|| anyhow!("invalid worktree path"))?;

    let mut cmd = Cmd::new("git")
        .workdir(repo_path)
        .arg("worktree")
        .arg("add");

    if create_branch {
        cmd = cmd.arg("-b").arg(branch_name).arg(path_str);
        if let Some(base) = base {
            cmd = cmd.arg(base);
        }
    } else {
        cmd = cmd.arg(path_str).arg(branch_name);
    }

    cmd.run().context("failed to create worktree")?;
    Ok(())
}

/// Remove a worktree directory. Force-removes so dirty working trees don't
/// block teardown; the dirty-changes guard lives one layer up, in
/// `Instance::kill`/`pause`, which check `is_dirty` before calling this
/// when the caller cares.
pub fn remove_worktree(repo_path: &Path, worktree_path: &Path) -> Result<()> {
    let path_str = worktree_path
        .to_str()
        .ok_or_else(|| anyhow!("invalid worktree path"))?;
    Cmd::new("git")
        .workdir(repo_path)
        .args(&["worktree", "remove", "--force", path_str])
        .run()
        .context("failed to remove worktree")?;
    Ok(())
}

/// `git worktree remove`, but success if the worktree is already gone —
/// used by the cleanup retry loop, where "already gone" counts as success.
pub fn remove_worktree_tolerant(repo_path: &Path, worktree_path: &Path) -> Result<()> {
    if !worktree_path.exists() {
        return Ok(());
    }
    match remove_worktree(repo_path, worktree_path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // The directory may have vanished between the exists() check
            // and the git invocation, or git may already consider it gone.
            if !worktree_path.exists() {
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}

pub fn prune_worktrees(repo_path: &Path) -> Result<()> {
    Cmd::new("git")
        .workdir(repo_path)
        .args(&["worktree", "prune"])
        .run()
        .context("failed to prune worktrees")?;
    Ok(())
}

/// Parsed block from `git worktree list --porcelain`.
struct WorktreeEntry {
    path: PathBuf,
    branch: Option<String>,
}

fn parse_worktree_list_porcelain(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    for block in output.trim().split("\n\n") {
        let mut path = None;
        let mut branch = None;
        for line in block.lines() {
            if let Some(p) = line.strip_prefix("worktree ") {
                path = Some(PathBuf::from(p));
            } else if let Some(b) = line.strip_prefix("branch refs/heads/") {
                branch = Some(b.to_string());
            }
        }
        if let Some(path) = path {
            entries.push(WorktreeEntry { path, branch });
        }
    }
    entries
}

pub fn list_worktrees(repo_path: &Path) -> Result<Vec<(PathBuf, Option<String>)>> {
    let output = Cmd::new("git")
        .workdir(repo_path)
        .args(&["worktree", "list", "--porcelain"])
        .run_and_capture_stdout()
        .context("failed to list worktrees")?;
    Ok(parse_worktree_list_porcelain(&output)
        .into_iter()
        .map(|e| (e.path, e.branch))
        .collect())
}

/// True if `branch_name` is checked out in any worktree under `repo_path`
/// other than `except`.
pub fn branch_checked_out_elsewhere(
    repo_path: &Path,
    branch_name: &str,
    except: &Path,
) -> Result<bool> {
    let worktrees = list_worktrees(repo_path)?;
    Ok(worktrees.into_iter().any(|(path, branch)| {
        path != except && branch.as_deref() == Some(branch_name)
    }))
}

/// Find the worktree whose directory name matches `session_name` (the
/// convention this core uses: worktree directories are named
/// `<title>-<8-hex>`, and the multiplexer session is named after the
/// instance title, so lookups by session name resolve through the
/// directory name, not the branch).
pub fn find_worktree_by_session(repo_path: &Path, session_name: &str) -> Result<PathBuf> {
    let worktrees = list_worktrees(repo_path)?;
    for (path, _) in &worktrees {
        if let Some(dir_name) = path.file_name()
            && dir_name.to_string_lossy().starts_with(session_name)
        {
            return Ok(path.clone());
        }
    }
    Err(WorktreeNotFound(session_name.to_string()).into())
}

/// Root of the main worktree (not a linked one). Used to resolve relative
/// paths and to `chdir` away from a worktree that is about to be deleted.
pub fn get_main_worktree_root(repo_path: &Path) -> Result<PathBuf> {
    let output = Cmd::new("git")
        .workdir(repo_path)
        .args(&["worktree", "list", "--porcelain"])
        .run_and_capture_stdout()
        .context("failed to list worktrees while locating main worktree")?;

    let entries = parse_worktree_list_porcelain(&output);
    for entry in &entries {
        if entry.path.exists() {
            return Ok(entry.path.clone());
        }
    }
    entries
        .into_iter()
        .next()
        .map(|e| e.path)
        .ok_or_else(|| anyhow!("no main worktree found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_block() {
        let out = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n";
        let entries = parse_worktree_list_porcelain(out);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, PathBuf::from("/repo"));
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
    }

    #[test]
    fn parses_multiple_blocks_and_detached_head() {
        let out = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\nworktree /repo/.worktrees/feat-ab12\nHEAD def456\nbranch refs/heads/feat\n\nworktree /repo/.worktrees/detached\nHEAD 999\ndetached\n";
        let entries = parse_worktree_list_porcelain(out);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].branch.as_deref(), Some("feat"));
        assert_eq!(entries[2].branch, None);
    }
}
