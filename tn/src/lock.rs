//! Reminder lock
//!
//! The existence of `reminder.lock` means "a reminder window is open". It is
//! the only cross-process synchronization primitive: the daemon will not
//! launch another reminder while it exists.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::daemon::is_process_running;
use crate::state::{StateDir, temp_path, write_atomic};

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Reminder lock already held by PID {holder_pid:?}")]
    AlreadyLocked { holder_pid: Option<u32> },

    #[error("Lock I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Contents of the lock marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder_pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    fn new(holder_pid: u32) -> Self {
        Self {
            holder_pid,
            acquired_at: Utc::now(),
        }
    }
}

/// Filesystem-backed mutual exclusion for reminder windows
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    path: PathBuf,
}

impl LockCoordinator {
    pub fn new(dir: &StateDir) -> Self {
        Self { path: dir.lock() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the marker naming this process; fails if it already exists
    pub fn acquire(&self) -> Result<LockRecord, LockError> {
        self.acquire_as(std::process::id())
    }

    /// Create the marker naming `holder_pid`; fails if it already exists
    ///
    /// The record is written to a temp file first and hard-linked into place,
    /// so creation is exclusive and readers never see a half-written marker.
    pub fn acquire_as(&self, holder_pid: u32) -> Result<LockRecord, LockError> {
        debug!(holder_pid, path = ?self.path, "LockCoordinator::acquire_as: called");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let record = LockRecord::new(holder_pid);
        let content = serde_json::to_string(&record).map_err(io::Error::other)?;
        let tmp = temp_path(&self.path);
        fs::write(&tmp, content)?;
        let linked = fs::hard_link(&tmp, &self.path);
        let _ = fs::remove_file(&tmp);

        match linked {
            Ok(()) => {
                info!(holder_pid, "Reminder lock acquired");
                Ok(record)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder_pid = self.holder().map(|r| r.holder_pid);
                debug!(?holder_pid, "LockCoordinator::acquire_as: already locked");
                Err(LockError::AlreadyLocked { holder_pid })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the marker; removing an absent marker is not an error
    pub fn release(&self) -> Result<(), LockError> {
        debug!(path = ?self.path, "LockCoordinator::release: called");
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Reminder lock released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the marker only if it names `pid`
    pub fn release_if_held_by(&self, pid: u32) -> Result<bool, LockError> {
        match self.holder() {
            Some(record) if record.holder_pid == pid => {
                self.release()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn is_held(&self) -> bool {
        self.path.exists()
    }

    /// Read the current holder; `None` when absent or unreadable
    pub fn holder(&self) -> Option<LockRecord> {
        let content = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Unreadable reminder lock");
                None
            }
        }
    }

    /// Take the lock for this process as a reminder session
    ///
    /// Succeeds when the marker is absent, or when it is held by `handoff_pid`
    /// (the daemon that launched us), by this process, or by a process that
    /// no longer exists. A live foreign holder means another reminder is open.
    pub fn claim(&self, handoff_pid: Option<u32>) -> Result<LockGuard, LockError> {
        let me = std::process::id();
        debug!(me, ?handoff_pid, "LockCoordinator::claim: called");

        match self.acquire_as(me) {
            Ok(_) => return Ok(LockGuard::new(self.clone(), me)),
            Err(LockError::AlreadyLocked { .. }) => {}
            Err(e) => return Err(e),
        }

        let holder = self.holder();
        let transferable = match &holder {
            Some(record) => {
                Some(record.holder_pid) == handoff_pid
                    || record.holder_pid == me
                    || !is_process_running(record.holder_pid)
            }
            // Present but unreadable
            None => true,
        };

        if !transferable {
            return Err(LockError::AlreadyLocked {
                holder_pid: holder.map(|r| r.holder_pid),
            });
        }

        let content = serde_json::to_string(&LockRecord::new(me)).map_err(io::Error::other)?;
        write_atomic(&self.path, &content).map_err(io::Error::other)?;
        info!(me, from = ?holder.map(|r| r.holder_pid), "Reminder lock taken over");
        Ok(LockGuard::new(self.clone(), me))
    }

    /// Force-clear a lock whose holder process has died
    pub fn clear_if_stale(&self) -> Result<bool, LockError> {
        if !self.is_held() {
            return Ok(false);
        }
        let stale = match self.holder() {
            Some(record) => !is_process_running(record.holder_pid),
            None => true,
        };
        if stale {
            warn!(path = ?self.path, "Clearing stale reminder lock");
            self.release()?;
        }
        Ok(stale)
    }
}

/// Scoped ownership of the reminder lock
///
/// Dropping the guard releases the lock if it still names the owner, so every
/// exit path out of a reminder session (including unwinding) frees it.
#[derive(Debug)]
pub struct LockGuard {
    lock: LockCoordinator,
    owner: u32,
    released: bool,
}

impl LockGuard {
    fn new(lock: LockCoordinator, owner: u32) -> Self {
        Self {
            lock,
            owner,
            released: false,
        }
    }

    pub fn owner(&self) -> u32 {
        self.owner
    }

    /// Release explicitly (idempotent)
    pub fn release(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.lock.release_if_held_by(self.owner).map(|_| ())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "Failed to release reminder lock on drop");
        }
    }
}
