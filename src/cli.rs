//! Ambient CLI surface: thin `clap`-derived wrappers over the
//! supervision core, for scripting and debugging outside an interactive
//! dashboard. Each subcommand constructs a `Supervisor`, calls the one
//! core operation it names, and prints a result.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};

use crate::config::{self, Config};
use crate::error::CoreError;
use crate::multiplexer::{MultiplexerBackend, TmuxBackend};
use crate::supervisor::Supervisor;

#[derive(Parser)]
#[command(
    name = "agentyard",
    version,
    about = "Supervises multiple long-running AI coding agents, each in its own tmux session and git worktree"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new instance. Does not start it.
    New {
        title: String,
        /// Repository path; defaults to the current directory.
        #[arg(long)]
        path: Option<PathBuf>,
        /// Program to run inside the session; defaults to the configured default.
        #[arg(long)]
        program: Option<String>,
    },
    /// Materialise the worktree and session for an instance, starting the agent.
    Start { title: String },
    /// List known instances with their status and branch.
    List,
    /// Attach to an instance's multiplexer session. Blocks until detach.
    Attach { title: String },
    /// Send a prompt to a running instance.
    Send { title: String, text: String },
    /// Kill an instance: closes its session and tears down its worktree and branch.
    Kill {
        title: String,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Commit and push an instance's branch.
    Push {
        title: String,
        #[arg(long, default_value = "wip")]
        message: String,
        #[arg(long)]
        open_pr: bool,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Pause an instance: commits dirty state, tears down the session and
    /// worktree, keeps the branch, copies its name to the clipboard.
    Pause { title: String },
    /// Resume a paused instance.
    Resume { title: String },
    /// Interactive dashboard. The TUI framework is an external collaborator
    /// outside this core's scope; this prints the current instance table.
    Dashboard,
    /// Generate shell completion scripts.
    Completions { shell: Shell },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        print_completions(shell);
        return Ok(());
    }

    let config = Config::load()?;
    config::ensure_dirs()?;
    let instances_path = config::instances_file()?;
    let worktree_store_dir = config::worktree_store_dir()?;
    let backend: Arc<dyn MultiplexerBackend> = Arc::new(TmuxBackend::new());

    let mut supervisor = Supervisor::load(config, instances_path, worktree_store_dir, backend)
        .map_err(core_err)?;

    match cli.command {
        Commands::New { title, path, program } => {
            let path = match path {
                Some(p) => p,
                None => std::env::current_dir()?,
            };
            supervisor.new_instance(&title, path, program).map_err(core_err)?;
            supervisor.save().map_err(core_err)?;
            println!("created instance '{title}'");
        }
        Commands::Start { title } => {
            supervisor.start(&title).map_err(core_err)?;
            println!("started '{title}'");
        }
        Commands::List | Commands::Dashboard => print_list(&supervisor),
        Commands::Attach { title } => {
            supervisor.attach(&title).map_err(core_err)?;
        }
        Commands::Send { title, text } => {
            supervisor.send_prompt(&title, &text).map_err(core_err)?;
            supervisor.save().map_err(core_err)?;
        }
        Commands::Kill { title, yes } => {
            supervisor.request_kill(&title).map_err(core_err)?;
            run_confirmed(&mut supervisor, yes)?;
        }
        Commands::Push { title, message, open_pr, yes } => {
            supervisor.request_push(&title, &message, open_pr).map_err(core_err)?;
            run_confirmed(&mut supervisor, yes)?;
        }
        Commands::Pause { title } => {
            supervisor.pause(&title).map_err(core_err)?;
        }
        Commands::Resume { title } => {
            supervisor.resume(&title).map_err(core_err)?;
        }
        Commands::Completions { .. } => unreachable!("handled before supervisor construction"),
    }

    Ok(())
}

fn core_err(e: CoreError) -> anyhow::Error {
    anyhow!(e.to_string())
}

/// Drives the pending confirmation: `--yes` bypasses the prompt,
/// otherwise reads a `y`/`n` line from stdin the way an interactive
/// `Confirm` overlay would gate the same action on a keypress.
fn run_confirmed(supervisor: &mut Supervisor, yes: bool) -> Result<()> {
    let Some(pending) = supervisor.confirm.pending() else {
        return Ok(());
    };
    let message = pending.message.clone();

    let confirmed = if yes {
        true
    } else {
        print!("{message} Press y to confirm, n to cancel: ");
        io::stdout().flush().ok();
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    };

    if confirmed {
        supervisor.confirm_pending().map_err(core_err)
    } else {
        supervisor.cancel_pending();
        Ok(())
    }
}

fn print_list(supervisor: &Supervisor) {
    if supervisor.instances().is_empty() {
        println!("no instances");
        return;
    }
    for instance in supervisor.instances() {
        println!(
            "{:<24} {:<8?} {}",
            instance.title,
            instance.status,
            instance.branch.as_deref().unwrap_or("-"),
        );
    }
}

fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
