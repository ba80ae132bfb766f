//! The multiplexer controller: owns one detached terminal session per
//! instance. `MultiplexerBackend` is the seam a fake implementation
//! substitutes in tests; `TmuxBackend` is the only production
//! implementation, since this core drives a single multiplexer kind
//! rather than the multi-backend abstraction this codebase historically
//! supported.

pub mod prompt;
pub mod tmux;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

pub use prompt::PromptClassifier;
pub use tmux::TmuxBackend;

/// The subprocess-facing half of the multiplexer controller. Kept as a
/// trait so tests can substitute a fake without touching a real
/// multiplexer.
pub trait MultiplexerBackend: Send + Sync {
    fn start(&self, session_name: &str, program: &str, cwd: &Path, width: u16, height: u16)
    -> Result<()>;
    fn restore(&self, session_name: &str) -> Result<()>;
    fn close(&self, session_name: &str) -> Result<()>;
    fn exists(&self, session_name: &str) -> Result<bool>;
    fn capture(&self, session_name: &str, full_history: bool) -> Result<String>;
    fn send_keys(&self, session_name: &str, text: &str) -> Result<()>;
    fn tap_enter(&self, session_name: &str) -> Result<()>;
    fn set_detached_size(&self, session_name: &str, width: u16, height: u16) -> Result<()>;
    /// Gives up the calling process's terminal to the session. Blocks
    /// until the operator detaches (or the session ends).
    fn attach(&self, session_name: &str) -> Result<()>;
}

/// Digest-based change detection plus the prompt classifier, wrapping a
/// `MultiplexerBackend`. One per `Instance`; not persisted — reconstructed
/// on load from `{session_name, program}`.
pub struct MultiplexerSession {
    pub session_name: String,
    pub program: String,
    last_snapshot_digest: Option<u64>,
    backend: Arc<dyn MultiplexerBackend>,
    classifier: PromptClassifier,
}

impl MultiplexerSession {
    pub fn new(
        session_name: impl Into<String>,
        program: impl Into<String>,
        backend: Arc<dyn MultiplexerBackend>,
        classifier: PromptClassifier,
    ) -> Self {
        Self {
            session_name: session_name.into(),
            program: program.into(),
            last_snapshot_digest: None,
            backend,
            classifier,
        }
    }

    pub fn start(&mut self, cwd: &Path, width: u16, height: u16) -> Result<()> {
        self.backend
            .start(&self.session_name, &self.program, cwd, width, height)?;
        self.last_snapshot_digest = None;
        Ok(())
    }

    pub fn restore(&mut self) -> Result<()> {
        self.backend.restore(&self.session_name)
    }

    pub fn close(&self) -> Result<()> {
        self.backend.close(&self.session_name)
    }

    pub fn exists(&self) -> Result<bool> {
        self.backend.exists(&self.session_name)
    }

    pub fn capture(&self, full_history: bool) -> Result<String> {
        self.backend.capture(&self.session_name, full_history)
    }

    pub fn send_keys(&self, text: &str) -> Result<()> {
        self.backend.send_keys(&self.session_name, text)
    }

    pub fn tap_enter(&self) -> Result<()> {
        self.backend.tap_enter(&self.session_name)
    }

    pub fn set_detached_size(&self, width: u16, height: u16) -> Result<()> {
        self.backend
            .set_detached_size(&self.session_name, width, height)
    }

    pub fn attach(&self) -> Result<()> {
        self.backend.attach(&self.session_name)
    }

    /// Recaptures the pane and compares a digest with the previous
    /// capture. Returns `(changed, prompt_visible)`. `prompt_visible` is
    /// evaluated against the freshly captured content regardless of
    /// whether it changed, since an untouched pane can still be sitting at
    /// a confirmation prompt.
    pub fn has_updated(&mut self) -> Result<(bool, bool)> {
        let content = self.backend.capture(&self.session_name, false)?;
        let digest = digest_of(&content);
        let changed = self.last_snapshot_digest != Some(digest);
        self.last_snapshot_digest = Some(digest);
        let prompt_visible = self.classifier.matches(&content);
        Ok((changed, prompt_visible))
    }
}

fn digest_of(content: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeBackend {
        captures: Mutex<Vec<String>>,
        exists: Mutex<bool>,
        sent: Mutex<Vec<String>>,
        enters: Mutex<u32>,
    }

    impl FakeBackend {
        fn new(captures: Vec<&str>) -> Self {
            Self {
                captures: Mutex::new(captures.into_iter().map(String::from).rev().collect()),
                exists: Mutex::new(true),
                sent: Mutex::new(Vec::new()),
                enters: Mutex::new(0),
            }
        }
    }

    impl MultiplexerBackend for FakeBackend {
        fn start(&self, _: &str, _: &str, _: &Path, _: u16, _: u16) -> Result<()> {
            Ok(())
        }
        fn restore(&self, _: &str) -> Result<()> {
            Ok(())
        }
        fn close(&self, _: &str) -> Result<()> {
            Ok(())
        }
        fn exists(&self, _: &str) -> Result<bool> {
            Ok(*self.exists.lock().unwrap())
        }
        fn capture(&self, _: &str, _: bool) -> Result<String> {
            let mut captures = self.captures.lock().unwrap();
            Ok(captures.pop().unwrap_or_default())
        }
        fn send_keys(&self, _: &str, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
        fn tap_enter(&self, _: &str) -> Result<()> {
            *self.enters.lock().unwrap() += 1;
            Ok(())
        }
        fn set_detached_size(&self, _: &str, _: u16, _: u16) -> Result<()> {
            Ok(())
        }
        fn attach(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn has_updated_reports_change_on_first_capture() {
        let backend = Arc::new(FakeBackend::new(vec!["hello"]));
        let mut session =
            MultiplexerSession::new("s", "claude", backend, PromptClassifier::default());
        let (changed, prompt) = session.has_updated().unwrap();
        assert!(changed);
        assert!(!prompt);
    }

    #[test]
    fn has_updated_reports_no_change_when_digest_matches() {
        let backend = Arc::new(FakeBackend::new(vec!["same", "same"]));
        let mut session =
            MultiplexerSession::new("s", "claude", backend, PromptClassifier::default());
        session.has_updated().unwrap();
        let (changed, _) = session.has_updated().unwrap();
        assert!(!changed);
    }

    #[test]
    fn has_updated_detects_confirm_prompt_even_without_change() {
        let backend = Arc::new(FakeBackend::new(vec![
            "Do you want to proceed?",
            "Do you want to proceed?",
        ]));
        let mut session =
            MultiplexerSession::new("s", "claude", backend, PromptClassifier::default());
        session.has_updated().unwrap();
        let (changed, prompt) = session.has_updated().unwrap();
        assert!(!changed);
        assert!(prompt);
    }
}
