//! Supervisor / Controller: owns the instance collection, dispatches
//! operator commands, and runs the 500 ms metadata tick.

pub mod confirm;
pub mod ticker;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::instance::{Instance, Status};
use crate::multiplexer::{MultiplexerBackend, PromptClassifier};
use crate::storage::{self, TaggedInstance};

use confirm::{ConfirmBus, ConfirmableAction, ErrorBus, PendingAction};
use ticker::TickGuard;

pub struct Supervisor {
    instances: Vec<Instance>,
    selected: usize,
    config: Config,
    instances_path: PathBuf,
    worktree_store_dir: PathBuf,
    backend: Arc<dyn MultiplexerBackend>,
    pub confirm: ConfirmBus,
    pub errors: ErrorBus,
    tick_guard: TickGuard,
}

impl Supervisor {
    /// Loads `instances_path`, reconstructing external resources: Paused
    /// instances are not eagerly restored; anything else attempts
    /// `start(first_time=false)`, and a restore failure is reported but
    /// does not abort loading the rest.
    pub fn load(
        config: Config,
        instances_path: PathBuf,
        worktree_store_dir: PathBuf,
        backend: Arc<dyn MultiplexerBackend>,
    ) -> CoreResult<Self> {
        let tagged = storage::load(&instances_path)
            .map_err(|e| CoreError::persistence(e.to_string()))?;

        let mut instances = Vec::new();
        for item in tagged {
            let TaggedInstance::Task(record) = item else {
                continue;
            };
            // Running and Ready both imply a live session should exist
            // for every started, non-Paused instance; only Paused skips
            // restore.
            let needs_restore = record.status != Status::Paused;
            let mut instance = Instance::from_record(record, Arc::clone(&backend), &config);
            if needs_restore {
                if let Err(e) = instance.start(false) {
                    warn!(title = %instance.title, error = %e, "supervisor:load restore failed");
                }
            }
            instances.push(instance);
        }

        Ok(Self {
            instances,
            selected: 0,
            config,
            instances_path,
            worktree_store_dir,
            backend,
            confirm: ConfirmBus::new(),
            errors: ErrorBus::new(),
            tick_guard: TickGuard::new(),
        })
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn selected(&self) -> Option<&Instance> {
        self.instances.get(self.selected)
    }

    fn find_index(&self, title: &str) -> CoreResult<usize> {
        self.instances
            .iter()
            .position(|i| i.title == title)
            .ok_or_else(|| CoreError::state(format!("no instance named '{title}'")))
    }

    /// Writes the current collection to `instances_path` atomically.
    /// Triggered after any operation that adds/removes/modifies
    /// persistent fields, and on quit.
    pub fn save(&self) -> CoreResult<()> {
        let tagged: Vec<TaggedInstance> = self
            .instances
            .iter()
            .filter_map(Instance::to_record)
            .map(TaggedInstance::Task)
            .collect();
        storage::save(&self.instances_path, &tagged)
            .map_err(|e| CoreError::persistence(e.to_string()))
    }

    /// `new`: enforces title uniqueness and `GLOBAL_INSTANCE_LIMIT` before
    /// inserting; does not mutate the collection on failure.
    pub fn new_instance(&mut self, title: &str, path: PathBuf, program: Option<String>) -> CoreResult<()> {
        if self.instances.len() >= self.config.effective_instance_limit() {
            return Err(CoreError::setup(format!(
                "instance limit reached ({} live instances)",
                self.config.effective_instance_limit()
            )));
        }
        if self.instances.iter().any(|i| i.title == title) {
            return Err(CoreError::setup(format!("an instance titled '{title}' already exists")));
        }
        if title.is_empty() || title.chars().count() > crate::instance::MAX_TITLE_LEN {
            return Err(CoreError::setup("title must be between 1 and 32 characters"));
        }

        let classifier = PromptClassifier::from_patterns(&self.config.confirm_patterns);
        let instance = Instance::new(
            title,
            path,
            program.unwrap_or_else(|| self.config.default_program.clone()),
            self.config.default_width,
            self.config.default_height,
            false,
            Arc::clone(&self.backend),
            classifier,
            self.worktree_store_dir.clone(),
        );
        self.instances.push(instance);
        info!(title, "supervisor:new_instance queued (not yet started)");
        Ok(())
    }

    /// `new_with_prompt`: convenience that creates, starts, then sends an
    /// initial prompt in one call.
    pub fn new_with_prompt(
        &mut self,
        title: &str,
        path: PathBuf,
        program: Option<String>,
        prompt: &str,
    ) -> CoreResult<()> {
        self.new_instance(title, path, program)?;
        self.start(title)?;
        self.send_prompt(title, prompt)
    }

    pub fn start(&mut self, title: &str) -> CoreResult<()> {
        let idx = self.find_index(title)?;
        self.instances[idx].start(true)?;
        self.save()
    }

    pub fn up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
    }

    pub fn down(&mut self) {
        if self.selected + 1 < self.instances.len() {
            self.selected += 1;
        }
    }

    /// Blocking from the operator's viewpoint: hands the terminal to the
    /// multiplexer session until the operator detaches.
    pub fn attach(&self, title: &str) -> CoreResult<()> {
        let idx = self.find_index(title)?;
        let instance = &self.instances[idx];
        instance
            .mux_attach()
            .map_err(|e| CoreError::setup(e.to_string()))
    }

    pub fn send_prompt(&mut self, title: &str, text: &str) -> CoreResult<()> {
        let idx = self.find_index(title)?;
        self.instances[idx].send_prompt(text)
    }

    /// `kill`/`push` are gated behind a confirmation. Builds the pending
    /// action and the message the overlay (or the
    /// scripted CLI prompt) should show; does not perform the action.
    pub fn request_kill(&mut self, title: &str) -> CoreResult<()> {
        let idx = self.find_index(title)?;
        if self.instances[idx].is_branch_checked_out_elsewhere().unwrap_or(false) {
            return Err(CoreError::conflict(format!(
                "instance '{title}' is currently checked out"
            )));
        }
        self.confirm.confirm_action(
            format!("[!] Kill session '{title}'?"),
            ConfirmableAction::Kill { title: title.to_string() },
        );
        Ok(())
    }

    pub fn request_push(&mut self, title: &str, commit_message: &str, open_pr: bool) -> CoreResult<()> {
        self.find_index(title)?;
        self.confirm.confirm_action(
            format!("[!] Push branch for '{title}'?"),
            ConfirmableAction::Push {
                title: title.to_string(),
                commit_message: commit_message.to_string(),
                open_pr,
            },
        );
        Ok(())
    }

    /// `y`: runs whatever is currently pending, if anything.
    pub fn confirm_pending(&mut self) -> CoreResult<()> {
        let Some(PendingAction { action, .. }) = self.confirm.confirm() else {
            return Ok(());
        };
        match action {
            ConfirmableAction::Kill { title } => self.kill_now(&title),
            ConfirmableAction::Push { title, commit_message, open_pr } => {
                self.push_now(&title, &commit_message, open_pr)
            }
        }
    }

    /// `n` / `esc`.
    pub fn cancel_pending(&mut self) {
        self.confirm.cancel();
    }

    /// The actual kill, run once confirmed. Removal and save happen
    /// regardless of whether the instance ever reached Running: even an
    /// un-started instance occupies a title slot worth evicting.
    fn kill_now(&mut self, title: &str) -> CoreResult<()> {
        let idx = self.find_index(title)?;
        let result = self.instances[idx].kill();
        self.instances.remove(idx);
        if self.selected >= self.instances.len() && self.selected > 0 {
            self.selected -= 1;
        }
        self.save()?;
        result
    }

    fn push_now(&mut self, title: &str, commit_message: &str, open_pr: bool) -> CoreResult<()> {
        let idx = self.find_index(title)?;
        self.instances[idx].push(commit_message, open_pr)
    }

    /// `checkout` (= pause). Unlike kill/resume, pause never guards on
    /// "branch checked out elsewhere" — pause is the operation that
    /// *frees* the branch, so no such conflict can exist here.
    pub fn pause(&mut self, title: &str) -> CoreResult<()> {
        let idx = self.find_index(title)?;
        self.instances[idx].pause()?;
        self.save()
    }

    pub fn resume(&mut self, title: &str) -> CoreResult<()> {
        let idx = self.find_index(title)?;
        if self.instances[idx].is_branch_checked_out_elsewhere().unwrap_or(false) {
            return Err(CoreError::conflict(format!(
                "instance '{title}' is currently checked out"
            )));
        }
        self.instances[idx].resume()?;
        self.save()
    }

    /// `quit`: persists then the caller exits the process.
    pub fn quit(&self) -> CoreResult<()> {
        self.save()
    }

    /// Metadata tick: for each started, non-Paused instance, check for
    /// pane updates / auto-confirm, then refresh diff stats. Skips
    /// entirely if a previous tick is still in flight.
    pub fn run_metadata_tick(&mut self) {
        let Some(_run) = self.tick_guard.try_begin() else {
            return;
        };
        for instance in self.instances.iter_mut() {
            if !instance.started() || instance.status == Status::Paused {
                continue;
            }
            match instance.has_updated() {
                Ok((true, _)) => instance.mark_running(),
                Ok((false, true)) => {
                    if let Err(e) = instance.tap_enter() {
                        warn!(title = %instance.title, error = %e, "tick: auto-confirm tap_enter failed");
                    }
                }
                Ok((false, false)) => instance.mark_ready(),
                Err(e) => warn!(title = %instance.title, error = %e, "tick: has_updated failed"),
            }
            if let Err(e) = instance.update_diff_stats() {
                warn!(title = %instance.title, error = %e, "tick: update_diff_stats failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::TmuxBackend;
    use std::path::Path;

    fn fresh_supervisor(dir: &Path) -> Supervisor {
        Supervisor::load(
            Config::default(),
            dir.join("instances.json"),
            dir.join("worktrees"),
            Arc::new(TmuxBackend::new()),
        )
        .unwrap()
    }

    #[test]
    fn new_instance_rejects_duplicate_titles() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = fresh_supervisor(dir.path());
        sup.new_instance("alpha", PathBuf::from("/repo"), None).unwrap();
        let err = sup.new_instance("alpha", PathBuf::from("/repo"), None).unwrap_err();
        assert!(matches!(err, CoreError::Setup(_)));
        assert_eq!(sup.instances().len(), 1);
    }

    #[test]
    fn new_instance_enforces_the_global_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = fresh_supervisor(dir.path());
        sup.config.instance_limit = 2;
        sup.new_instance("a", PathBuf::from("/repo"), None).unwrap();
        sup.new_instance("b", PathBuf::from("/repo"), None).unwrap();
        let err = sup.new_instance("c", PathBuf::from("/repo"), None).unwrap_err();
        assert!(matches!(err, CoreError::Setup(_)));
        assert_eq!(sup.instances().len(), 2);
    }

    #[test]
    fn request_kill_builds_a_pending_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = fresh_supervisor(dir.path());
        sup.new_instance("alpha", PathBuf::from("/repo"), None).unwrap();
        sup.request_kill("alpha").unwrap();
        assert!(sup.confirm.pending().is_some());
    }

    #[test]
    fn cancel_pending_drops_without_removing_the_instance() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = fresh_supervisor(dir.path());
        sup.new_instance("alpha", PathBuf::from("/repo"), None).unwrap();
        sup.request_kill("alpha").unwrap();
        sup.cancel_pending();
        assert_eq!(sup.instances().len(), 1);
    }

    #[test]
    fn confirm_pending_on_kill_removes_the_instance_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = fresh_supervisor(dir.path());
        sup.new_instance("alpha", PathBuf::from("/repo"), None).unwrap();
        sup.request_kill("alpha").unwrap();
        // An un-started instance never reached Running; kill_now still
        // removes it and saves.
        let _ = sup.confirm_pending();
        assert!(sup.instances().is_empty());
        assert!(storage::load(&dir.path().join("instances.json")).unwrap().is_empty());
    }
}
