//! Instance: composes one multiplexer session with one worktree handle
//! and owns the per-agent lifecycle state machine.

pub mod record;
pub mod worktree_handle;

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::clipboard;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::git::diff::DiffStats;
use crate::multiplexer::{MultiplexerBackend, MultiplexerSession, PromptClassifier};

pub use record::Status;
use record::InstanceRecord;
use worktree_handle::WorktreeHandle;

/// Title length bound from the data model.
pub const MAX_TITLE_LEN: usize = 32;

pub struct Instance {
    pub title: String,
    pub path: PathBuf,
    pub branch: Option<String>,
    pub program: String,
    pub status: Status,
    pub auto_yes: bool,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub diff_stats: Option<DiffStats>,
    pub width: u16,
    pub height: u16,

    started: bool,
    worktree: Option<WorktreeHandle>,
    mux: Option<MultiplexerSession>,
    completion_subs: Mutex<Vec<mpsc::Sender<()>>>,

    backend: Arc<dyn MultiplexerBackend>,
    classifier: PromptClassifier,
    worktree_store_dir: PathBuf,
}

impl Instance {
    pub fn new(
        title: impl Into<String>,
        path: PathBuf,
        program: impl Into<String>,
        width: u16,
        height: u16,
        auto_yes: bool,
        backend: Arc<dyn MultiplexerBackend>,
        classifier: PromptClassifier,
        worktree_store_dir: PathBuf,
    ) -> Self {
        let now = Utc::now();
        Self {
            title: title.into(),
            path,
            branch: None,
            program: program.into(),
            status: Status::Loading,
            auto_yes,
            created_at: now,
            updated_at: now,
            diff_stats: None,
            width,
            height,
            started: false,
            worktree: None,
            mux: None,
            completion_subs: Mutex::new(Vec::new()),
            backend,
            classifier,
            worktree_store_dir,
        }
    }

    pub fn started(&self) -> bool {
        self.started
    }

    /// Permitted only before first start — the title is baked into the
    /// branch name and session name once materialised.
    pub fn set_title(&mut self, title: &str) -> CoreResult<()> {
        if self.started {
            return Err(CoreError::state(
                "cannot change title after the instance has been started",
            ));
        }
        if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
            return Err(CoreError::setup(format!(
                "title must be between 1 and {MAX_TITLE_LEN} characters"
            )));
        }
        self.title = title.to_string();
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn derive_branch_name(&self) -> String {
        derive_branch_name(&self.title)
    }

    fn worktree_dir_name(&self, suffix: &str) -> String {
        format!("{}-{}", derive_branch_name(&self.title), suffix)
    }

    /// `start(first_time)`: creates branch + worktree + session when
    /// `first_time`; otherwise only restores the session from the
    /// persisted worktree metadata. Any failure mid-call triggers a
    /// scoped rollback of whichever of (branch, worktree, session) was
    /// created in this call.
    pub fn start(&mut self, first_time: bool) -> CoreResult<()> {
        self.status = Status::Loading;

        if first_time {
            self.start_first_time()
        } else {
            self.start_restore()
        }
    }

    fn start_first_time(&mut self) -> CoreResult<()> {
        let branch_name = self.derive_branch_name();
        let suffix = random_hex_suffix();
        let worktree_path = self.worktree_store_dir.join(self.worktree_dir_name(&suffix));

        let mut handle = WorktreeHandle::new(
            self.path.clone(),
            worktree_path.clone(),
            self.title.clone(),
            branch_name.clone(),
            String::new(),
        );

        if let Err(e) = handle.setup() {
            // Nothing else was created yet; nothing to roll back beyond
            // whatever setup() itself already unwound.
            return Err(e);
        }

        let mut session = MultiplexerSession::new(
            self.title.clone(),
            self.program.clone(),
            Arc::clone(&self.backend),
            self.classifier.clone(),
        );

        if let Err(e) = session.start(&worktree_path, self.width, self.height) {
            warn!(title = %self.title, error = %e, "instance:start rolling back worktree after session failure");
            let _ = handle.cleanup();
            return Err(CoreError::setup(format!(
                "could not start multiplexer session: {e}"
            )));
        }

        self.branch = Some(branch_name);
        self.worktree = Some(handle);
        self.mux = Some(session);
        self.started = true;
        self.status = Status::Running;
        self.touch();
        info!(title = %self.title, "instance:start first_time complete");
        Ok(())
    }

    fn start_restore(&mut self) -> CoreResult<()> {
        let Some(session) = self.mux.as_mut() else {
            return Err(CoreError::state(
                "cannot restore an instance with no persisted multiplexer session",
            ));
        };
        match session.restore() {
            Ok(()) => {
                self.started = true;
                self.status = Status::Running;
                self.touch();
                info!(title = %self.title, "instance:start restore complete");
                Ok(())
            }
            Err(e) => {
                warn!(title = %self.title, error = %e, "instance:restore failed");
                Err(CoreError::setup(format!(
                    "could not restore multiplexer session: {e}"
                )))
            }
        }
    }

    /// Closes the session then tears down the worktree; tolerant to
    /// either already being gone. A compound error surfaces only if both
    /// fail.
    pub fn kill(&mut self) -> CoreResult<()> {
        let mux_err = self
            .mux
            .as_ref()
            .and_then(|m| m.close().err())
            .map(|e| e.to_string());

        let cleanup_err = match self.worktree.as_ref() {
            Some(handle) => handle.cleanup().err(),
            None => None,
        };

        self.notify_completion_subscribers();
        self.mux = None;
        self.worktree = None;
        self.started = false;
        self.touch();

        match (mux_err, cleanup_err) {
            (None, None) => {
                info!(title = %self.title, "instance:kill complete");
                Ok(())
            }
            (mux_err, cleanup_err) => {
                let mut causes = Vec::new();
                if let Some(e) = mux_err {
                    causes.push(format!("session close: {e}"));
                }
                if let Some(e) = cleanup_err {
                    causes.push(e.to_string());
                }
                Err(CoreError::Cleanup {
                    attempts: 1,
                    causes: causes.join("; "),
                })
            }
        }
    }

    /// Commits dirty changes, closes the session, removes the worktree
    /// (keeps the branch), copies the branch name to the clipboard.
    /// Aborts mid-way (stays Running) if the commit fails.
    pub fn pause(&mut self) -> CoreResult<()> {
        if !self.started || self.status == Status::Paused {
            return Err(CoreError::state(
                "pause requires a started, non-paused instance",
            ));
        }
        let Some(handle) = self.worktree.as_ref() else {
            return Err(CoreError::state("instance has no worktree to pause"));
        };

        handle
            .commit_dirty_with_generated_message()
            .map_err(|e| CoreError::setup(format!("auto-commit before pause failed: {e}")))?;

        if let Some(mux) = &self.mux {
            mux.close()
                .map_err(|e| CoreError::setup(format!("could not close session: {e}")))?;
        }

        handle
            .remove()
            .map_err(|e| CoreError::setup(format!("could not remove worktree: {e}")))?;

        if let Some(branch) = &self.branch {
            let _ = clipboard::copy_to_clipboard(branch);
        }

        self.mux = None;
        self.status = Status::Paused;
        self.touch();
        info!(title = %self.title, "instance:pause complete");
        Ok(())
    }

    /// Precondition: `Paused` and the branch is not checked out elsewhere.
    /// Re-creates the worktree, starts a fresh session; cleans up the
    /// worktree if session start fails.
    pub fn resume(&mut self) -> CoreResult<()> {
        if self.status != Status::Paused {
            return Err(CoreError::state("resume requires a paused instance"));
        }
        let Some(handle) = self.worktree.as_mut() else {
            return Err(CoreError::state("instance has no worktree to resume"));
        };

        if handle.is_branch_checked_out_elsewhere()? {
            let branch = self.branch.clone().unwrap_or_default();
            return Err(CoreError::conflict(branch));
        }

        handle.setup()?;

        let mut session = MultiplexerSession::new(
            self.title.clone(),
            self.program.clone(),
            Arc::clone(&self.backend),
            self.classifier.clone(),
        );

        if let Err(e) = session.start(&handle.worktree_path, self.width, self.height) {
            warn!(title = %self.title, error = %e, "instance:resume rolling back worktree after session failure");
            let _ = handle.remove();
            return Err(CoreError::setup(format!(
                "could not start multiplexer session on resume: {e}"
            )));
        }

        self.mux = Some(session);
        self.started = true;
        self.status = Status::Running;
        self.touch();
        info!(title = %self.title, "instance:resume complete");
        Ok(())
    }

    /// Commits any dirty changes with `commit_message` and pushes the
    /// branch upstream. `open_pr` is forwarded to the underlying git
    /// helper, which is responsible for deciding what, if anything, that
    /// means for the configured remote.
    pub fn push(&self, commit_message: &str, open_pr: bool) -> CoreResult<()> {
        let handle = self
            .worktree
            .as_ref()
            .ok_or_else(|| CoreError::state("instance has no worktree to push"))?;
        handle.push_changes(commit_message, open_pr)
    }

    /// Writes `text`, waits so the terminal does not interpret the
    /// trailing newline as a paste, taps Enter, and resets the
    /// completion-subscriber set.
    pub fn send_prompt(&mut self, text: &str) -> CoreResult<()> {
        let Some(mux) = &self.mux else {
            return Err(CoreError::state("instance has no active session"));
        };
        mux.send_keys(text)
            .map_err(|e| CoreError::setup(format!("send_keys failed: {e}")))?;
        std::thread::sleep(Duration::from_millis(100));
        mux.tap_enter()
            .map_err(|e| CoreError::setup(format!("tap_enter failed: {e}")))?;
        self.notify_completion_subscribers();
        self.status = Status::Running;
        self.touch();
        Ok(())
    }

    /// No-op unless `auto_yes`.
    pub fn tap_enter(&self) -> CoreResult<()> {
        if !self.auto_yes {
            return Ok(());
        }
        if let Some(mux) = &self.mux {
            mux.tap_enter()
                .map_err(|e| CoreError::setup(format!("tap_enter failed: {e}")))?;
        }
        Ok(())
    }

    pub fn preview(&self) -> CoreResult<String> {
        let mux = self
            .mux
            .as_ref()
            .ok_or_else(|| CoreError::state("instance has no active session"))?;
        mux.capture(false).map_err(CoreError::Other)
    }

    pub fn full_output(&self) -> CoreResult<String> {
        let mux = self
            .mux
            .as_ref()
            .ok_or_else(|| CoreError::state("instance has no active session"))?;
        mux.capture(true).map_err(CoreError::Other)
    }

    /// Pass-through to the multiplexer's change/prompt detector. Feeds
    /// the metadata tick's status classification in the supervisor.
    pub fn has_updated(&mut self) -> CoreResult<(bool, bool)> {
        let mux = self
            .mux
            .as_mut()
            .ok_or_else(|| CoreError::state("instance has no active session"))?;
        mux.has_updated().map_err(CoreError::Other)
    }

    /// Recomputes and caches `diff_stats`. On a fresh instance with no
    /// `base_commit_sha` yet, quietly clears the cache rather than
    /// propagating an error.
    pub fn update_diff_stats(&mut self) -> CoreResult<()> {
        let Some(handle) = &self.worktree else {
            self.diff_stats = None;
            return Ok(());
        };
        if handle.base_commit_sha.is_empty() {
            self.diff_stats = None;
            return Ok(());
        }
        self.diff_stats = Some(handle.diff());
        Ok(())
    }

    /// Blocks until an idle transition closes every subscribed channel, or
    /// `timeout` elapses. Callers may pass a shorter timeout for tests;
    /// the default ceiling used by the supervisor is a hard 30 minutes.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let (tx, rx) = mpsc::channel::<()>();
        self.completion_subs.lock().unwrap().push(tx);
        match rx.recv_timeout(timeout) {
            // A sender is never actually used to send a value; completion
            // is signalled by the whole subscriber set being dropped.
            Ok(()) => true,
            Err(mpsc::RecvTimeoutError::Disconnected) => true,
            Err(mpsc::RecvTimeoutError::Timeout) => false,
        }
    }

    /// Drops every registered completion sender, which disconnects their
    /// receivers and wakes any `wait_for_completion` call blocked on one.
    /// Called both when a fresh prompt is sent (invalidating stale
    /// subscriptions) and when the metadata tick observes the agent going
    /// idle again (the actual completion signal).
    fn notify_completion_subscribers(&self) {
        self.completion_subs.lock().unwrap().clear();
    }

    /// Called by the supervisor's metadata tick when this instance's
    /// status transitions from Running to Ready.
    pub fn mark_ready(&mut self) {
        self.status = Status::Ready;
        self.notify_completion_subscribers();
        self.touch();
    }

    pub fn mark_running(&mut self) {
        self.status = Status::Running;
        self.touch();
    }

    pub fn is_branch_checked_out_elsewhere(&self) -> CoreResult<bool> {
        let Some(handle) = &self.worktree else {
            return Ok(false);
        };
        handle.is_branch_checked_out_elsewhere()
    }

    /// Hands the terminal to the underlying multiplexer session. Blocks
    /// until the operator detaches.
    pub fn mux_attach(&self) -> anyhow::Result<()> {
        let mux = self
            .mux
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("instance has no active session to attach to"))?;
        mux.attach()
    }

    pub fn exists_externally(&self) -> bool {
        self.mux.as_ref().map(|m| m.exists().unwrap_or(false)).unwrap_or(false)
    }

    /// Serialises this instance, or `None` if it has never been started
    /// (an un-started instance has no worktree and so no five-string
    /// handle to recreate — it is not part of the persisted contract).
    pub fn to_record(&self) -> Option<InstanceRecord> {
        let handle = self.worktree.as_ref()?;
        let branch = self.branch.clone().unwrap_or_else(|| handle.branch_name.clone());
        Some(InstanceRecord {
            title: self.title.clone(),
            path: self.path.display().to_string(),
            branch,
            status: self.status,
            height: self.height,
            width: self.width,
            created_at: self.created_at,
            updated_at: self.updated_at,
            auto_yes: self.auto_yes,
            program: self.program.clone(),
            worktree: handle.to_data(),
            diff_stats: self.diff_stats.clone(),
        })
    }

    /// Reconstructs an instance from its persisted record. Does not
    /// eagerly restore the session: the caller (storage::load) decides
    /// whether to call `start(first_time=false)` based on the persisted
    /// status.
    pub fn from_record(
        record: InstanceRecord,
        backend: Arc<dyn MultiplexerBackend>,
        config: &Config,
    ) -> Self {
        let classifier = PromptClassifier::from_patterns(&config.confirm_patterns);
        let handle = WorktreeHandle::from_data(&record.worktree);
        let mux = MultiplexerSession::new(
            record.worktree.session_name.clone(),
            record.program.clone(),
            Arc::clone(&backend),
            classifier.clone(),
        );
        Self {
            title: record.title,
            path: PathBuf::from(record.path),
            branch: Some(record.branch),
            program: record.program,
            status: record.status,
            auto_yes: record.auto_yes,
            created_at: record.created_at,
            updated_at: record.updated_at,
            diff_stats: record.diff_stats,
            width: record.width,
            height: record.height,
            started: record.status != Status::Paused,
            worktree: Some(handle),
            mux: Some(mux),
            completion_subs: Mutex::new(Vec::new()),
            backend,
            classifier,
            worktree_store_dir: PathBuf::new(),
        }
    }
}

fn derive_branch_name(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '/' {
            out.push(ch.to_ascii_lowercase());
        } else if ch.is_whitespace() {
            out.push('-');
        }
    }
    if out.is_empty() { "instance".to_string() } else { out }
}

fn random_hex_suffix() -> String {
    let mut buf = [0u8; 4];
    if getrandom::fill(&mut buf).is_err() {
        // Extremely unlikely; fall back to a timestamp-derived value so
        // worktree paths still don't collide in practice.
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        return format!("{nanos:08x}");
    }
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_kebab_branch_name_from_title() {
        assert_eq!(derive_branch_name("My Feature"), "my-feature");
        assert_eq!(derive_branch_name("asdf"), "asdf");
        assert_eq!(derive_branch_name("a/b_c-D"), "a/b_c-d");
    }

    #[test]
    fn empty_title_would_not_reach_derive_branch_name() {
        // set_title rejects empty titles before this function is ever
        // called on one; this just documents the fallback exists.
        assert_eq!(derive_branch_name(""), "instance");
    }

    #[test]
    fn random_hex_suffix_is_eight_lowercase_hex_chars() {
        let suffix = random_hex_suffix();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
