//! `WorktreeHandle`: the five-string value type an `Instance` recreates
//! on load. Owns a read/write lock so `diff`/`is_dirty`/
//! `is_branch_checked_out` (readers) never observe a worktree mid-teardown
//! by `setup`/`remove`/`cleanup` (writers).

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::error::{CoreError, CoreResult};
use crate::git;
use crate::git::diff::DiffStats;

use super::record::WorktreeHandleData;

pub struct WorktreeHandle {
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub session_name: String,
    pub branch_name: String,
    pub base_commit_sha: String,
    lock: Arc<RwLock<()>>,
}

impl WorktreeHandle {
    pub fn new(
        repo_path: PathBuf,
        worktree_path: PathBuf,
        session_name: String,
        branch_name: String,
        base_commit_sha: String,
    ) -> Self {
        Self {
            repo_path,
            worktree_path,
            session_name,
            branch_name,
            base_commit_sha,
            lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn to_data(&self) -> WorktreeHandleData {
        WorktreeHandleData {
            repo_path: self.repo_path.display().to_string(),
            worktree_path: self.worktree_path.display().to_string(),
            session_name: self.session_name.clone(),
            branch_name: self.branch_name.clone(),
            base_commit_sha: self.base_commit_sha.clone(),
        }
    }

    pub fn from_data(data: &WorktreeHandleData) -> Self {
        Self::new(
            PathBuf::from(&data.repo_path),
            PathBuf::from(&data.worktree_path),
            data.session_name.clone(),
            data.branch_name.clone(),
            data.base_commit_sha.clone(),
        )
    }

    /// Idempotent: if `branch_name` already exists, the worktree is
    /// created from it; otherwise a new branch is cut from HEAD and
    /// `base_commit_sha` is recorded. Fails with a dedicated error on a
    /// repository with zero commits.
    pub fn setup(&mut self) -> CoreResult<()> {
        let _guard = self.lock.write().unwrap();

        if !git::has_commits(&self.repo_path)
            .map_err(|e| CoreError::setup(format!("could not inspect repository: {e}")))?
        {
            return Err(CoreError::setup(
                "repository has no commits yet; an initial commit is required before an instance can be started",
            ));
        }

        let branch_already_exists = git::branch_exists(&self.repo_path, &self.branch_name)
            .map_err(|e| CoreError::setup(e.to_string()))?;

        if branch_already_exists {
            git::create_worktree(
                &self.repo_path,
                &self.worktree_path,
                &self.branch_name,
                false,
                None,
            )
            .map_err(|e| CoreError::setup(e.to_string()))?;
        } else {
            let base = git::rev_parse_head(&self.repo_path)
                .map_err(|e| CoreError::setup(format!("could not resolve HEAD: {e}")))?;
            git::create_worktree(
                &self.repo_path,
                &self.worktree_path,
                &self.branch_name,
                true,
                None,
            )
            .map_err(|e| CoreError::setup(e.to_string()))?;
            self.base_commit_sha = base;
        }

        info!(
            branch = %self.branch_name,
            path = %self.worktree_path.display(),
            "worktree:setup complete"
        );
        Ok(())
    }

    /// Removes the worktree directory but preserves the branch.
    pub fn remove(&self) -> CoreResult<()> {
        let _guard = self.lock.write().unwrap();
        git::worktree::remove_worktree_tolerant(&self.repo_path, &self.worktree_path)
            .map_err(|e| CoreError::setup(e.to_string()))?;
        Ok(())
    }

    /// Full teardown of worktree + branch, with retry-and-verify.
    pub fn cleanup(&self) -> CoreResult<()> {
        let _guard = self.lock.write().unwrap();
        git::cleanup_worktree(&self.repo_path, &self.worktree_path, &self.branch_name)
    }

    pub fn is_dirty(&self) -> CoreResult<bool> {
        let _guard = self.lock.read().unwrap();
        git::branch::has_uncommitted_changes(&self.worktree_path)
            .map_err(|e| CoreError::Other(e))
    }

    pub fn is_branch_checked_out_elsewhere(&self) -> CoreResult<bool> {
        let _guard = self.lock.read().unwrap();
        git::is_branch_checked_out_elsewhere(&self.repo_path, &self.branch_name, &self.worktree_path)
            .map_err(|e| CoreError::Other(e))
    }

    pub fn push_changes(&self, commit_message: &str, _open_pr: bool) -> CoreResult<()> {
        let _guard = self.lock.write().unwrap();
        let dirty = git::branch::has_uncommitted_changes(&self.worktree_path)
            .map_err(|e| CoreError::Other(e))?;
        git::branch::push_changes(&self.worktree_path, &self.branch_name, commit_message, dirty)
            .map_err(|e| CoreError::Other(e))
    }

    /// Commit dirty state with a generated message (used by `pause`).
    /// Returns whether a commit was actually made.
    pub fn commit_dirty_with_generated_message(&self) -> CoreResult<bool> {
        let _guard = self.lock.write().unwrap();
        git::branch::commit_dirty_with_generated_message(&self.worktree_path)
            .map_err(|e| CoreError::Other(e))
    }

    /// Computes the diff against `base_commit_sha`. Never returns an
    /// `Err` — transient failures collapse into an empty `DiffStats`.
    pub fn diff(&self) -> DiffStats {
        let _guard = self.lock.read().unwrap();
        git::compute_diff(&self.worktree_path, &self.base_commit_sha)
    }

    pub fn worktree_exists_on_disk(&self) -> bool {
        Path::new(&self.worktree_path).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_its_five_strings() {
        let handle = WorktreeHandle::new(
            PathBuf::from("/repo"),
            PathBuf::from("/repo/.worktrees/x-ab12"),
            "x".to_string(),
            "x".to_string(),
            "deadbeef".to_string(),
        );
        let data = handle.to_data();
        let restored = WorktreeHandle::from_data(&data);
        assert_eq!(restored.repo_path, handle.repo_path);
        assert_eq!(restored.worktree_path, handle.worktree_path);
        assert_eq!(restored.session_name, handle.session_name);
        assert_eq!(restored.branch_name, handle.branch_name);
        assert_eq!(restored.base_commit_sha, handle.base_commit_sha);
    }

    #[test]
    fn diff_on_nonexistent_worktree_is_empty_not_an_error() {
        let handle = WorktreeHandle::new(
            PathBuf::from("/repo"),
            PathBuf::from("/definitely/does/not/exist"),
            "x".to_string(),
            "x".to_string(),
            "deadbeef".to_string(),
        );
        let stats = handle.diff();
        assert_eq!(stats.added, 0);
        assert_eq!(stats.removed, 0);
    }
}
