//! Paths and user-settable defaults.
//!
//! The supervision core never touches a config file path itself —
//! it is handed already-resolved values (instance limit, pane geometry,
//! confirm-prompt patterns) by whatever constructs it. This module is the
//! one piece of the binary that actually knows where things live on disk,
//! matching the role the TUI layer and key maps play for the rendering
//! side: an external collaborator, not part of the core contract.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Canonical default. A third-party fork is known to run with 1000; this
/// core uses 10 and lets configuration lower it, never raise it.
pub const GLOBAL_INSTANCE_LIMIT: usize = 10;

pub const DEFAULT_WIDTH: u16 = 220;
pub const DEFAULT_HEIGHT: u16 = 50;
pub const DEFAULT_PROGRAM: &str = "claude";

/// Default patterns matched against the last few lines of a captured pane
/// to decide whether the agent is waiting on a y/n confirmation. Kept as
/// plain strings (not compiled regexes) so they serialize cleanly and new
/// agent variants can add their own without touching the state machine.
fn default_confirm_patterns() -> Vec<String> {
    vec![
        r"(?i)do you want to proceed".to_string(),
        r"(?i)press enter to confirm".to_string(),
        r"(?i)\(y/n\)\s*$".to_string(),
        r"(?i)\[y/n\]\s*$".to_string(),
        r"(?i)continue\?\s*$".to_string(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Overrides `GLOBAL_INSTANCE_LIMIT` downward. Values above the
    /// canonical limit are clamped, never raised.
    pub instance_limit: usize,
    pub default_width: u16,
    pub default_height: u16,
    pub default_program: String,
    pub confirm_patterns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_limit: GLOBAL_INSTANCE_LIMIT,
            default_width: DEFAULT_WIDTH,
            default_height: DEFAULT_HEIGHT,
            default_program: DEFAULT_PROGRAM.to_string(),
            confirm_patterns: default_confirm_patterns(),
        }
    }
}

impl Config {
    /// Resolved instance limit: configuration may only lower the canonical
    /// ceiling, never raise it.
    pub fn effective_instance_limit(&self) -> usize {
        self.instance_limit.min(GLOBAL_INSTANCE_LIMIT)
    }

    /// Load from `$XDG_CONFIG_HOME/agentyard/config.yaml`, falling back to
    /// `~/.config/agentyard/config.yaml`, falling back to built-in defaults
    /// if neither exists. A present-but-malformed file is a fatal startup
    /// error, not a silent fallback.
    pub fn load() -> Result<Self> {
        let path = config_file()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("could not read config file at {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("could not parse config file at {}", path.display()))?;
        Ok(config)
    }
}

/// `$XDG_CONFIG_HOME` or `~/.config`.
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
        && !xdg.is_empty()
    {
        return Ok(PathBuf::from(xdg).join("agentyard"));
    }
    let home = home::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
    Ok(home.join(".config").join("agentyard"))
}

pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.yaml"))
}

/// `$XDG_STATE_HOME` or `~/.local/state`; this is where persisted instance
/// state and the worktree store live, distinct from the config file.
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME")
        && !xdg.is_empty()
    {
        return Ok(PathBuf::from(xdg).join("agentyard"));
    }
    let home = home::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
    Ok(home.join(".local").join("state").join("agentyard"))
}

pub fn instances_file() -> Result<PathBuf> {
    Ok(state_dir()?.join("instances.json"))
}

pub fn worktree_store_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("worktrees"))
}

/// Create the directories this binary needs at startup. Failure here is
/// fatal at startup: print and exit non-zero.
pub fn ensure_dirs() -> Result<()> {
    fs::create_dir_all(state_dir()?).context("could not create state directory")?;
    fs::create_dir_all(worktree_store_dir()?).context("could not create worktree store")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_instance_limit_never_exceeds_canonical() {
        let mut config = Config::default();
        config.instance_limit = 1000;
        assert_eq!(config.effective_instance_limit(), GLOBAL_INSTANCE_LIMIT);
    }

    #[test]
    fn effective_instance_limit_honors_lower_override() {
        let mut config = Config::default();
        config.instance_limit = 3;
        assert_eq!(config.effective_instance_limit(), 3);
    }

    #[test]
    fn default_confirm_patterns_are_nonempty() {
        assert!(!Config::default().confirm_patterns.is_empty());
    }
}
