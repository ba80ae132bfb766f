//! Cleanup-with-verify: the full teardown of a worktree + branch, retried
//! up to 3 times with 100 ms × attempt progressive backoff, each attempt
//! followed by a verification step. "Already gone" counts as success at
//! every sub-step.

use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::CoreError;

use super::branch;
use super::worktree;

const MAX_ATTEMPTS: u32 = 3;

/// Tear down the worktree at `worktree_path` and the branch `branch_name`
/// in `repo_path`. Idempotent: calling this twice in a row on an
/// already-clean state is a no-op success.
pub fn cleanup_worktree(
    repo_path: &Path,
    worktree_path: &Path,
    branch_name: &str,
) -> Result<(), CoreError> {
    let mut causes = Vec::new();

    for attempt in 1..=MAX_ATTEMPTS {
        match try_cleanup_once(repo_path, worktree_path, branch_name) {
            Ok(()) => match verify_clean(repo_path, worktree_path, branch_name) {
                Ok(()) => {
                    info!(branch = branch_name, attempt, "cleanup:verified");
                    return Ok(());
                }
                Err(e) => {
                    warn!(branch = branch_name, attempt, error = %e, "cleanup:verify failed");
                    causes.push(format!("attempt {attempt} verify: {e}"));
                }
            },
            Err(e) => {
                warn!(branch = branch_name, attempt, error = %e, "cleanup:attempt failed");
                causes.push(format!("attempt {attempt}: {e}"));
            }
        }

        if attempt < MAX_ATTEMPTS {
            thread::sleep(Duration::from_millis(100 * attempt as u64));
        }
    }

    Err(CoreError::Cleanup {
        attempts: MAX_ATTEMPTS,
        causes: causes.join("; "),
    })
}

/// One teardown pass: remove the worktree directory, delete the branch via
/// both `git2` and the CLI, prune administrative files. Every step
/// tolerates "already gone".
fn try_cleanup_once(
    repo_path: &Path,
    worktree_path: &Path,
    branch_name: &str,
) -> anyhow::Result<()> {
    worktree::remove_worktree_tolerant(repo_path, worktree_path)?;
    branch::delete_branch_library(repo_path, branch_name)?;
    branch::delete_branch_cli(repo_path, branch_name)?;
    worktree::prune_worktrees(repo_path)?;
    Ok(())
}

/// Three-part verification: (a) the branch ref is gone, (b) no worktree
/// lists the branch, (c) a same-named branch can be created and
/// immediately deleted, proving no stale lock file remains.
fn verify_clean(repo_path: &Path, worktree_path: &Path, branch_name: &str) -> anyhow::Result<()> {
    if branch::branch_exists(repo_path, branch_name)? {
        anyhow::bail!("branch '{}' still resolves via git2", branch_name);
    }

    let worktrees = worktree::list_worktrees(repo_path)?;
    if worktrees
        .iter()
        .any(|(_, b)| b.as_deref() == Some(branch_name))
    {
        anyhow::bail!(
            "branch '{}' is still listed by `git worktree list`",
            branch_name
        );
    }

    branch::probe_recreatable(repo_path, branch_name)?;

    debug!(branch = branch_name, path = %worktree_path.display(), "cleanup:verify ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three rounds, progressive backoff. A regression that silently
    /// widens or narrows this constant changes observable retry timing,
    /// so pin it.
    #[test]
    fn retry_budget_is_three_attempts() {
        assert_eq!(MAX_ATTEMPTS, 3);
    }

    #[test]
    fn cleanup_error_formats_all_causes() {
        let err = CoreError::Cleanup {
            attempts: 3,
            causes: "attempt 1: x; attempt 2: y; attempt 3: z".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("3 attempt"));
        assert!(message.contains("attempt 1: x"));
    }

    // Exercising `cleanup_worktree` end-to-end would require a live `git`
    // repository and binary; per the test-tooling policy this crate keeps
    // such subprocess-touching behavior covered by the pure helpers here
    // (retry count, error formatting) and by the parser/diff-counter unit
    // tests in `worktree.rs`/`diff.rs`, not by spinning up real git state.
}
