//! Daemon process management
//!
//! Handles the daemon handle file, spawning the detached supervisor process,
//! and terminating previous instances.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::state::{HOME_ENV, StateDir, remove_if_exists, write_atomic};

/// Current version from git describe (set at compile time)
pub const VERSION: &str = env!("GIT_DESCRIBE");

/// How long `stop` waits for SIGTERM before escalating
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Persisted description of the running daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonHandle {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub version: String,
}

impl DaemonHandle {
    fn new(pid: u32) -> Self {
        Self {
            pid,
            started_at: Utc::now(),
            version: VERSION.to_string(),
        }
    }
}

/// Daemon process manager
#[derive(Debug, Clone)]
pub struct DaemonManager {
    dir: StateDir,
    /// Path to the handle file
    pid_file: PathBuf,
}

impl DaemonManager {
    pub fn new(dir: &StateDir) -> Self {
        debug!(root = ?dir.root(), "DaemonManager::new: called");
        Self {
            dir: dir.clone(),
            pid_file: dir.daemon(),
        }
    }

    /// Check if a daemon is running
    pub fn is_running(&self) -> bool {
        self.running_pid().is_some()
    }

    /// Get the running daemon's PID; stale handles yield `None`
    pub fn running_pid(&self) -> Option<u32> {
        let result = self.read_handle().map(|h| h.pid).filter(|&pid| is_process_running(pid));
        debug!(?result, "DaemonManager::running_pid: returning");
        result
    }

    /// Read the handle file
    pub fn read_handle(&self) -> Option<DaemonHandle> {
        let contents = fs::read_to_string(&self.pid_file).ok()?;
        match serde_json::from_str(&contents) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable daemon handle");
                None
            }
        }
    }

    fn write_handle(&self, handle: &DaemonHandle) -> Result<()> {
        debug!(pid = handle.pid, ?self.pid_file, "DaemonManager::write_handle: called");
        let contents = serde_json::to_string(handle).context("Failed to serialize daemon handle")?;
        write_atomic(&self.pid_file, &contents).context("Failed to write daemon handle")
    }

    fn remove_handle(&self) -> Result<()> {
        if remove_if_exists(&self.pid_file)? {
            debug!(path = ?self.pid_file, "Removed daemon handle");
        }
        Ok(())
    }

    /// Start the daemon
    ///
    /// Any daemon already running is terminated first, so repeated starts
    /// never pile up supervisor loops. Returns the new PID immediately.
    pub fn start(&self) -> Result<u32> {
        debug!("DaemonManager::start: called");
        if let Some(pid) = self.running_pid() {
            info!(pid, "Replacing running daemon");
            self.terminate(pid)?;
        }

        let exe = std::env::current_exe().context("Failed to get current executable")?;
        debug!(?exe, "DaemonManager::start: spawning daemon process");

        let mut command = Command::new(&exe);
        command
            .arg("run-daemon")
            .env(HOME_ENV, self.dir.root())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group: closing the terminal must not take the daemon with it
            command.process_group(0);
        }

        let child = command.spawn().context("Failed to spawn daemon process")?;
        let pid = child.id();
        self.write_handle(&DaemonHandle::new(pid))?;

        info!(pid, "Daemon started");
        Ok(pid)
    }

    /// Stop the daemon
    pub fn stop(&self) -> Result<()> {
        let pid = self.running_pid().ok_or_else(|| eyre::eyre!("Daemon is not running"))?;
        self.terminate(pid)?;
        info!(pid, "Daemon stopped");
        Ok(())
    }

    /// SIGTERM `pid`, wait, then SIGKILL; a vanished process is success
    fn terminate(&self, pid: u32) -> Result<()> {
        debug!(pid, "DaemonManager::terminate: called");
        if !send_terminate(pid)? {
            debug!(pid, "DaemonManager::terminate: process already gone");
            self.remove_handle()?;
            return Ok(());
        }

        let mut waited = Duration::ZERO;
        let step = Duration::from_millis(100);
        while is_process_running(pid) && waited < STOP_GRACE {
            std::thread::sleep(step);
            waited += step;
        }

        if is_process_running(pid) {
            warn!(pid, "Daemon did not stop gracefully, sending SIGKILL");
            #[cfg(unix)]
            {
                use nix::sys::signal::{Signal, kill};
                use nix::unistd::Pid;
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
        }

        self.remove_handle()
    }

    /// Register the current process as the daemon
    ///
    /// Called by the daemon process itself. A different live daemon named by
    /// the handle is terminated first.
    pub fn register_self(&self) -> Result<()> {
        let me = std::process::id();
        if let Some(pid) = self.running_pid().filter(|&pid| pid != me) {
            info!(pid, "Terminating previous daemon");
            self.terminate(pid)?;
        }
        self.write_handle(&DaemonHandle::new(me))?;
        info!(pid = me, version = VERSION, "Daemon registered");
        Ok(())
    }

    /// Remove the handle if it still names this process
    pub fn unregister_self(&self) -> Result<()> {
        let me = std::process::id();
        match self.read_handle() {
            Some(handle) if handle.pid != me => {
                debug!(owner = handle.pid, "DaemonManager::unregister_self: handle belongs to another daemon");
                Ok(())
            }
            _ => self.remove_handle(),
        }
    }

    pub fn pid_file(&self) -> &PathBuf {
        &self.pid_file
    }

    /// Get the daemon status
    pub fn status(&self) -> DaemonStatus {
        let handle = self.read_handle();
        let pid = handle.as_ref().map(|h| h.pid).filter(|&pid| is_process_running(pid));
        DaemonStatus {
            running: pid.is_some(),
            pid,
            started_at: handle.filter(|_| pid.is_some()).map(|h| h.started_at),
            pid_file: self.pid_file.clone(),
        }
    }
}

/// Send SIGTERM; `Ok(false)` when the process does not exist
fn send_terminate(pid: u32) -> Result<bool> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(eyre::eyre!("Failed to send SIGTERM to {}: {}", pid, e)),
        }
    }

    #[cfg(not(unix))]
    {
        let status = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .output()
            .context("Failed to kill process")?;
        Ok(status.status.success())
    }
}

/// Check if a process with the given PID is running
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        if pid == 0 || pid > i32::MAX as u32 {
            return false;
        }
        // Signal 0 checks existence; EPERM still means the process exists
        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Daemon status information
#[derive(Debug)]
pub struct DaemonStatus {
    /// Whether the daemon is running
    pub running: bool,
    /// Process ID (if running)
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    /// Handle file path
    pub pid_file: PathBuf,
}
