//! Branch-level operations. Reads go through `git2` (the library API);
//! destructive operations go through both `git2` and the CLI, since
//! cleanup-with-verify wants both code paths to agree that a branch is
//! gone.

use std::path::Path;

use anyhow::{Context, Result};

use crate::cmd::Cmd;

/// True if `branch_name` exists as a local branch, checked via `git2`.
pub fn branch_exists(repo_path: &Path, branch_name: &str) -> Result<bool> {
    let repo = git2::Repository::open(repo_path)
        .with_context(|| format!("could not open repository at {}", repo_path.display()))?;
    match repo.find_branch(branch_name, git2::BranchType::Local) {
        Ok(_) => Ok(true),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// True if `branch_name` is checked out in a worktree other than `except`.
/// Delegates to `git2`'s notion of "branch is used" via worktree listing,
/// cross-checked against the CLI-driven listing in `worktree.rs` by the
/// caller (cleanup calls both).
pub fn is_branch_checked_out_elsewhere(
    repo_path: &Path,
    branch_name: &str,
    except: &Path,
) -> Result<bool> {
    super::worktree::branch_checked_out_elsewhere(repo_path, branch_name, except)
}

/// Force-delete a branch via `git2`. Missing branch is success (already
/// gone counts as success, per the cleanup contract).
pub fn delete_branch_library(repo_path: &Path, branch_name: &str) -> Result<()> {
    let repo = git2::Repository::open(repo_path)?;
    match repo.find_branch(branch_name, git2::BranchType::Local) {
        Ok(mut branch) => {
            branch.delete().context("git2 branch delete failed")?;
            Ok(())
        }
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Force-delete a branch via the CLI. Missing branch is success.
pub fn delete_branch_cli(repo_path: &Path, branch_name: &str) -> Result<()> {
    let (ok, _) = Cmd::new("git")
        .workdir(repo_path)
        .args(&["branch", "-D", branch_name])
        .run_allow_failure()?;
    if ok || !branch_exists(repo_path, branch_name)? {
        Ok(())
    } else {
        anyhow::bail!("git branch -D {} failed", branch_name)
    }
}

/// Create-then-immediately-delete a branch of the same name, proving no
/// stale lock file (`refs/heads/<name>.lock`) remains from a previous,
/// interrupted deletion. Part of the cleanup verification substeps.
pub fn probe_recreatable(repo_path: &Path, branch_name: &str) -> Result<()> {
    let repo = git2::Repository::open(repo_path)?;
    let head = repo.head().context("repository has no HEAD to branch from")?;
    let commit = head.peel_to_commit()?;
    let mut branch = repo
        .branch(branch_name, &commit, true)
        .with_context(|| format!("probe: could not create branch '{}'", branch_name))?;
    branch
        .delete()
        .with_context(|| format!("probe: could not delete probe branch '{}'", branch_name))?;
    Ok(())
}

/// Stage everything, commit if dirty, push to `origin`. Returns the name
/// of the branch pushed (always `branch_name`, since worktrees are always
/// on the branch they were created for).
pub fn push_changes(
    repo_path: &Path,
    branch_name: &str,
    commit_message: &str,
    dirty: bool,
) -> Result<()> {
    if dirty {
        Cmd::new("git")
            .workdir(repo_path)
            .args(&["add", "-A"])
            .run()
            .context("failed to stage changes before push")?;
        Cmd::new("git")
            .workdir(repo_path)
            .args(&["commit", "-m", commit_message])
            .run()
            .context("failed to commit staged changes before push")?;
    }
    Cmd::new("git")
        .workdir(repo_path)
        .args(&["push", "-u", "origin", branch_name])
        .run()
        .context("failed to push branch")?;
    Ok(())
}

/// Whether the worktree at `worktree_path` has any uncommitted changes
/// (staged, unstaged, or untracked).
pub fn has_uncommitted_changes(worktree_path: &Path) -> Result<bool> {
    let status = Cmd::new("git")
        .workdir(worktree_path)
        .args(&["status", "--porcelain"])
        .run_and_capture_stdout()
        .context("failed to read git status")?;
    Ok(!status.trim().is_empty())
}

/// Commit any dirty state in `worktree_path` with a generated message.
/// Returns `true` if a commit was made, `false` if the tree was clean.
pub fn commit_dirty_with_generated_message(worktree_path: &Path) -> Result<bool> {
    if !has_uncommitted_changes(worktree_path)? {
        return Ok(false);
    }
    Cmd::new("git")
        .workdir(worktree_path)
        .args(&["add", "-A"])
        .run()
        .context("failed to stage changes before auto-commit")?;
    Cmd::new("git")
        .workdir(worktree_path)
        .args(&["commit", "-m", "wip: auto-commit on pause"])
        .run()
        .context("failed to auto-commit dirty changes before pause")?;
    Ok(true)
}
