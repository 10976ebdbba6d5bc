//! Launching detached processes
//!
//! Sessions start the daemon, the daemon opens reminder windows, and reminder
//! windows try to grab the screen. All three go through [`Launcher`] so the
//! scheduling logic can be exercised without spawning anything.

use std::process::{Command, Stdio};

use eyre::{Context, Result};
use tracing::{debug, info};

use crate::config::Config;
use crate::daemon::DaemonManager;
use crate::state::{HOME_ENV, StateDir};

pub trait Launcher: Send + Sync {
    /// Start the daemon as an independent process, replacing any running one
    fn start_daemon(&self) -> Result<u32>;

    /// Open a reminder session in a new terminal window
    ///
    /// `handoff_pid` is the holder of the reminder lock the new session may
    /// take over.
    fn spawn_reminder(&self, handoff_pid: u32) -> Result<()>;

    /// Best effort: make the current window fullscreen
    fn fullscreen(&self);
}

/// Launches real processes
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    dir: StateDir,
    daemon: DaemonManager,
    terminal: Vec<String>,
    fullscreen: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(dir: &StateDir, config: &Config) -> Self {
        Self {
            dir: dir.clone(),
            daemon: DaemonManager::new(dir),
            terminal: config.terminal.clone(),
            fullscreen: config.fullscreen.clone(),
        }
    }
}

impl Launcher for ProcessLauncher {
    fn start_daemon(&self) -> Result<u32> {
        self.daemon.start()
    }

    fn spawn_reminder(&self, handoff_pid: u32) -> Result<()> {
        let exe = std::env::current_exe().context("Failed to get current executable")?;
        let (program, prefix) = self
            .terminal
            .split_first()
            .ok_or_else(|| eyre::eyre!("No terminal command configured"))?;
        debug!(%program, ?prefix, ?exe, "ProcessLauncher::spawn_reminder: called");

        let mut command = Command::new(program);
        command
            .args(prefix)
            .arg(&exe)
            .arg("remind")
            .arg("--handoff")
            .arg(handoff_pid.to_string())
            .env(HOME_ENV, self.dir.root())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to open reminder window with {}", program))?;
        info!(pid = child.id(), "Reminder window launched");

        // Reap the terminal when it closes
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }

    fn fullscreen(&self) {
        let Some((program, args)) = self.fullscreen.split_first() else {
            return;
        };
        let result = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        debug!(?result, "ProcessLauncher::fullscreen: done");
    }
}
