//! The typed error variants components report through.
//!
//! Lower-level helpers (`git`, `multiplexer`, `cmd`) return `anyhow::Result`
//! with `.context(..)` breadcrumbs, same as the rest of this codebase.
//! Component boundaries (worktree manager, instance, storage, supervisor)
//! classify those into `CoreError` so callers can match on recovery policy
//! instead of string-sniffing messages.

use thiserror::Error;

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Cannot create worktree, branch, or multiplexer session at instance start.
    #[error("setup failed: {0}")]
    Setup(String),

    /// Operation invoked in a forbidden state (pause twice, resume unpaused, ...).
    #[error("invalid operation in current state: {0}")]
    State(String),

    /// Branch is checked out elsewhere during kill/resume.
    #[error("branch '{0}' is checked out in another worktree")]
    Conflict(String),

    /// Teardown could not complete within the retry budget.
    #[error("cleanup did not complete after {attempts} attempt(s): {causes}")]
    Cleanup { attempts: u32, causes: String },

    /// Storage load/save failed.
    #[error("storage error: {0}")]
    Persistence(String),

    /// Anything that doesn't need a specific kind crosses the boundary here.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    pub fn setup(msg: impl Into<String>) -> Self {
        CoreError::Setup(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        CoreError::State(msg.into())
    }

    pub fn conflict(branch: impl Into<String>) -> Self {
        CoreError::Conflict(branch.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        CoreError::Persistence(msg.into())
    }

    /// True for the kinds whose recovery policy is "swallow, keep going" at
    /// the call site that produced them (transient I/O failures never
    /// become a `CoreError` in the first place; they are swallowed before
    /// reaching this type. This helper exists for call sites that want to
    /// decide whether to keep processing siblings).
    pub fn is_recoverable_for_batch(&self) -> bool {
        matches!(
            self,
            CoreError::Setup(_) | CoreError::State(_) | CoreError::Conflict(_)
        )
    }
}
