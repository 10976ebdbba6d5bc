//! Persistent state directory
//!
//! Every process (foreground session, reminder session, daemon) coordinates
//! through a single directory of named resources. The file names are a
//! contract: other tooling may read them.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use tracing::{debug, warn};

/// Environment variable overriding the state directory
pub const HOME_ENV: &str = "TASKNAG_HOME";

pub const TASKS_FILE: &str = "tasks.json";
pub const CONFIG_FILE: &str = "config.yml";
pub const DAEMON_FILE: &str = "daemon.pid";
pub const LOCK_FILE: &str = "reminder.lock";
pub const LAST_ACTIVE_FILE: &str = "last-active";
pub const LOG_DIR: &str = "logs";

/// Location of every named resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Resolve the state directory: `$TASKNAG_HOME`, then the platform data dir
    pub fn resolve() -> Self {
        debug!("StateDir::resolve: called");
        let root = std::env::var_os(HOME_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("tasknag")
            });
        debug!(?root, "StateDir::resolve: returning");
        Self { root }
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory if it is missing
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create state directory {}", self.root.display()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks(&self) -> PathBuf {
        self.root.join(TASKS_FILE)
    }

    pub fn config(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn daemon(&self) -> PathBuf {
        self.root.join(DAEMON_FILE)
    }

    pub fn lock(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn last_active(&self) -> PathBuf {
        self.root.join(LAST_ACTIVE_FILE)
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    /// Overwrite the last-active marker with the current time
    pub fn touch_last_active(&self) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        write_atomic(&self.last_active(), &now.to_rfc3339())?;
        debug!(%now, "StateDir::touch_last_active: updated");
        Ok(now)
    }

    /// Read the last-active marker back (informational only)
    pub fn last_active_at(&self) -> Option<DateTime<Utc>> {
        let raw = fs::read_to_string(self.last_active()).ok()?;
        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable last-active marker");
                None
            }
        }
    }
}

/// Sibling temp path used for atomic replacement, unique per process
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("state");
    let tmp_name = format!(".{}.tmp-{}", name, std::process::id());
    path.parent()
        .map(|p| p.join(&tmp_name))
        .unwrap_or_else(|| PathBuf::from(&tmp_name))
}

/// Write `content` to a temp file and rename it over `path`
///
/// Readers in other processes see either the old or the new content, never a
/// partial write.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    debug!(?path, len = content.len(), "write_atomic: called");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }

    let tmp_path = temp_path(path);
    fs::write(&tmp_path, content).with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e).with_context(|| format!("Failed to replace {}", path.display()));
    }
    Ok(())
}

/// Remove a file, treating "not found" as success
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_resource_names_are_stable() {
        let dir = StateDir::at("/state");
        assert_eq!(dir.tasks(), PathBuf::from("/state/tasks.json"));
        assert_eq!(dir.config(), PathBuf::from("/state/config.yml"));
        assert_eq!(dir.daemon(), PathBuf::from("/state/daemon.pid"));
        assert_eq!(dir.lock(), PathBuf::from("/state/reminder.lock"));
        assert_eq!(dir.last_active(), PathBuf::from("/state/last-active"));
    }

    #[test]
    #[serial]
    fn test_resolve_honours_env_override() {
        let temp_dir = TempDir::new().unwrap();
        // SAFETY: serialized with the other env-touching tests
        unsafe { std::env::set_var(HOME_ENV, temp_dir.path()) };
        let dir = StateDir::resolve();
        unsafe { std::env::remove_var(HOME_ENV) };
        assert_eq!(dir.root(), temp_dir.path());
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("file.txt");

        write_atomic(&path, "one").unwrap();
        write_atomic(&path, "two").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_remove_if_exists_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gone");
        fs::write(&path, "x").unwrap();

        assert!(remove_if_exists(&path).unwrap());
        assert!(!remove_if_exists(&path).unwrap());
    }

    #[test]
    fn test_last_active_marker_is_overwritten() {
        let temp_dir = TempDir::new().unwrap();
        let dir = StateDir::at(temp_dir.path());

        let first = dir.touch_last_active().unwrap();
        let second = dir.touch_last_active().unwrap();

        assert!(second >= first);
        let stored = dir.last_active_at().unwrap();
        assert_eq!(stored.timestamp(), second.timestamp());
    }
}
