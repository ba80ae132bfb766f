//! The tmux-backed `MultiplexerBackend`.
//!
//! Wraps `tmux` invocations through `crate::cmd::Cmd`, same as the rest of
//! this codebase's subprocess plumbing. One session per instance, named
//! after the instance's title; no windows or panes beyond the single pane
//! tmux creates for a new session.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::cmd::Cmd;

use super::MultiplexerBackend;

#[derive(Debug, Default)]
pub struct TmuxBackend;

impl TmuxBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MultiplexerBackend for TmuxBackend {
    fn start(
        &self,
        session_name: &str,
        program: &str,
        cwd: &Path,
        width: u16,
        height: u16,
    ) -> Result<()> {
        if self.exists(session_name)? {
            return Err(anyhow!(
                "tmux session '{}' already exists",
                session_name
            ));
        }
        let cwd_str = cwd
            .to_str()
            .ok_or_else(|| anyhow!("invalid worktree path for tmux session"))?;
        let width_s = width.to_string();
        let height_s = height.to_string();
        Cmd::new("tmux")
            .args(&[
                "new-session",
                "-d",
                "-s",
                session_name,
                "-c",
                cwd_str,
                "-x",
                &width_s,
                "-y",
                &height_s,
                program,
            ])
            .run()
            .with_context(|| format!("failed to start tmux session '{}'", session_name))?;
        Ok(())
    }

    fn restore(&self, session_name: &str) -> Result<()> {
        if !self.exists(session_name)? {
            return Err(anyhow!(
                "tmux session '{}' does not exist, cannot restore",
                session_name
            ));
        }
        Ok(())
    }

    fn close(&self, session_name: &str) -> Result<()> {
        let (ok, _) = Cmd::new("tmux")
            .args(&["kill-session", "-t", session_name])
            .run_allow_failure()?;
        if ok || !self.exists(session_name)? {
            Ok(())
        } else {
            Err(anyhow!("failed to kill tmux session '{}'", session_name))
        }
    }

    fn exists(&self, session_name: &str) -> Result<bool> {
        Cmd::new("tmux")
            .args(&["has-session", "-t", session_name])
            .run_as_check()
    }

    fn capture(&self, session_name: &str, full_history: bool) -> Result<String> {
        let history_arg = if full_history { "-" } else { "-50" };
        let raw = Cmd::new("tmux")
            .args(&[
                "capture-pane",
                "-p",
                "-e",
                "-S",
                history_arg,
                "-t",
                session_name,
            ])
            .run_and_capture_stdout()
            .with_context(|| format!("failed to capture tmux pane '{}'", session_name))?;
        Ok(strip_ansi_escapes::strip_str(&raw))
    }

    fn send_keys(&self, session_name: &str, text: &str) -> Result<()> {
        Cmd::new("tmux")
            .args(&["send-keys", "-t", session_name, "-l", text])
            .run()
            .with_context(|| format!("failed to send keys to tmux session '{}'", session_name))?;
        Ok(())
    }

    fn tap_enter(&self, session_name: &str) -> Result<()> {
        Cmd::new("tmux")
            .args(&["send-keys", "-t", session_name, "Enter"])
            .run()
            .with_context(|| format!("failed to send Enter to tmux session '{}'", session_name))?;
        Ok(())
    }

    fn set_detached_size(&self, session_name: &str, width: u16, height: u16) -> Result<()> {
        let width_s = width.to_string();
        let height_s = height.to_string();
        Cmd::new("tmux")
            .args(&[
                "resize-window",
                "-t",
                session_name,
                "-x",
                &width_s,
                "-y",
                &height_s,
            ])
            .run()
            .with_context(|| format!("failed to resize tmux session '{}'", session_name))?;
        Ok(())
    }

    fn attach(&self, session_name: &str) -> Result<()> {
        use std::process::Command;
        let status = Command::new("tmux")
            .args(["attach-session", "-t", session_name])
            .status()
            .with_context(|| format!("failed to attach to tmux session '{}'", session_name))?;
        if status.success() {
            Ok(())
        } else {
            Err(anyhow!(
                "tmux attach-session exited with {:?}",
                status.code()
            ))
        }
    }
}
