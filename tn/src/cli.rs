//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::daemon::DaemonManager;
use crate::lock::LockCoordinator;
use crate::state::StateDir;

/// tasknag - a task list that nags until you look at it
#[derive(Parser)]
#[command(
    name = "tn",
    about = "Task list that reopens itself every few minutes until the work is done",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Open the task list as an auto-started session (for shell profiles)
    Resume,

    /// Internal: Show a reminder window (used by the daemon)
    #[command(hide = true)]
    Remind {
        /// PID allowed to hand over the reminder lock
        #[arg(long)]
        handoff: Option<u32>,
    },

    /// Internal: Run as daemon process (used by sessions on exit)
    #[command(hide = true)]
    RunDaemon,

    /// Manage the reminder daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

/// Daemon management subcommands
#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon (replaces a running one)
    Start,

    /// Stop the daemon
    Stop,

    /// Check daemon status
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Generate the after_help text with daemon and lock status
pub fn generate_after_help(dir: &StateDir) -> String {
    debug!("generate_after_help: called");
    let daemon = DaemonManager::new(dir).status();
    let lock = LockCoordinator::new(dir);

    let mut help = String::new();
    help.push_str("Daemon:\n");
    match daemon.pid {
        Some(pid) => help.push_str(&format!("  \u{2705} running (PID {})\n", pid)),
        None => help.push_str("  \u{274C} stopped\n"),
    }
    if lock.is_held() {
        help.push_str("  \u{1F514} reminder window open\n");
    }

    help.push('\n');
    help.push_str(&format!("State directory: {}\n", dir.root().display()));
    help.push_str(&format!("Logs are written to: {}\n", dir.logs().display()));
    help
}

/// Output format for status
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
