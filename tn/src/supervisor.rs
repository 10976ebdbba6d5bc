//! Daemon supervisor loop
//!
//! Sleeps for the configured interval, then opens a reminder window if there
//! is unfinished work and no reminder is already showing. Exits for good once
//! the task list has nothing left to do.

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::daemon::DaemonManager;
use crate::launcher::Launcher;
use crate::lock::{LockCoordinator, LockError};
use crate::state::StateDir;
use crate::tasks::TaskStore;

/// How often a held lock is re-checked
pub const LOCK_POLL: Duration = Duration::from_secs(1);

/// How long a lock may stay in the daemon's name after launching a reminder
pub const HANDOFF_GRACE: Duration = Duration::from_secs(60);

/// Result of one wake-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// A reminder was shown and has been closed
    Reminded,
    /// A reminder was already showing; waited for it to close
    Skipped,
    /// The reminder window could not be opened
    LaunchFailed,
    /// Nothing left to do; the daemon should exit
    Finished,
}

pub struct DaemonSupervisor {
    dir: StateDir,
    store: Arc<dyn TaskStore>,
    launcher: Arc<dyn Launcher>,
    lock: LockCoordinator,
    daemon: DaemonManager,
    /// Name the daemon acquires the lock under before handing it off
    pid: u32,
}

impl DaemonSupervisor {
    pub fn new(dir: &StateDir, store: Arc<dyn TaskStore>, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            dir: dir.clone(),
            store,
            launcher,
            lock: LockCoordinator::new(dir),
            daemon: DaemonManager::new(dir),
            pid: std::process::id(),
        }
    }

    /// Run until the task list has no unfinished items
    ///
    /// A failed wake is logged and retried after the next interval.
    pub async fn run(&self) -> Result<()> {
        info!(pid = self.pid, "Supervisor loop starting");
        loop {
            // Re-read every time so interval changes apply without a restart
            let interval = Config::load(&self.dir).interval();
            debug!(?interval, "DaemonSupervisor::run: sleeping");
            tokio::time::sleep(interval).await;

            match self.tick().await {
                Ok(Tick::Finished) => return Ok(()),
                Ok(tick) => info!(?tick, "Supervisor woke"),
                // Keep scheduling; only an empty task list ends the daemon
                Err(e) => {
                    warn!(error = ?e, "Supervisor wake failed, retrying next interval");
                    // A handoff left in our name would otherwise block every later wake
                    if let Err(e) = self.lock.release_if_held_by(self.pid) {
                        warn!(error = %e, "Failed to clear reminder lock after failed wake");
                    }
                }
            }
        }
    }

    /// One wake-up: check for work, then show at most one reminder
    pub async fn tick(&self) -> Result<Tick> {
        if !self.store.has_unfinished() {
            self.retire();
            return Ok(Tick::Finished);
        }

        if self.lock.is_held() {
            info!("Reminder already showing, skipping this wake");
            self.wait_for_release(None).await?;
            return Ok(Tick::Skipped);
        }

        match self.lock.acquire_as(self.pid) {
            Ok(_) => {}
            Err(LockError::AlreadyLocked { .. }) => {
                self.wait_for_release(None).await?;
                return Ok(Tick::Skipped);
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.launcher.spawn_reminder(self.pid) {
            warn!(error = %e, "Failed to open reminder window");
            self.lock.release()?;
            return Ok(Tick::LaunchFailed);
        }

        self.wait_for_release(Some(Instant::now())).await?;
        Ok(Tick::Reminded)
    }

    /// Poll until the lock is gone, clearing it if it has gone stale
    async fn wait_for_release(&self, spawned_at: Option<Instant>) -> Result<()> {
        loop {
            if !self.lock.is_held() {
                return Ok(());
            }
            if self.lock.clear_if_stale()? {
                return Ok(());
            }
            if let Some(t) = spawned_at
                && t.elapsed() >= HANDOFF_GRACE
                && self.lock.release_if_held_by(self.pid)?
            {
                warn!("Reminder window never took the lock, cleared it");
                return Ok(());
            }
            tokio::time::sleep(LOCK_POLL).await;
        }
    }

    /// Remove the daemon handle and any lock; the daemon is about to exit
    pub fn retire(&self) {
        info!("No unfinished tasks, supervisor retiring");
        if let Err(e) = self.daemon.unregister_self() {
            warn!(error = %e, "Failed to remove daemon handle");
        }
        if let Err(e) = self.lock.release() {
            warn!(error = %e, "Failed to remove reminder lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::JsonTaskStore;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    type OnReminder = Box<dyn Fn(&LockCoordinator) + Send + Sync>;

    struct RecordingLauncher {
        lock: LockCoordinator,
        reminders: Mutex<Vec<u32>>,
        daemons: AtomicUsize,
        on_reminder: OnReminder,
    }

    impl RecordingLauncher {
        fn new(dir: &StateDir, on_reminder: OnReminder) -> Arc<Self> {
            Arc::new(Self {
                lock: LockCoordinator::new(dir),
                reminders: Mutex::new(Vec::new()),
                daemons: AtomicUsize::new(0),
                on_reminder,
            })
        }

        fn reminder_count(&self) -> usize {
            self.reminders.lock().unwrap().len()
        }
    }

    impl Launcher for RecordingLauncher {
        fn start_daemon(&self) -> Result<u32> {
            self.daemons.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }

        fn spawn_reminder(&self, handoff_pid: u32) -> Result<()> {
            self.reminders.lock().unwrap().push(handoff_pid);
            (self.on_reminder)(&self.lock);
            Ok(())
        }

        fn fullscreen(&self) {}
    }

    /// Simulates a reminder window (PID 1 is always alive) taking the lock
    fn window_takes_lock() -> OnReminder {
        Box::new(|lock: &LockCoordinator| {
            lock.release().unwrap();
            lock.acquire_as(1).unwrap();
        })
    }

    fn setup(tasks: &[(&str, bool)], interval: u64) -> (TempDir, StateDir, Arc<JsonTaskStore>) {
        let temp_dir = TempDir::new().unwrap();
        let dir = StateDir::at(temp_dir.path());
        let store = Arc::new(JsonTaskStore::new(&dir));
        for (i, (text, done)) in tasks.iter().enumerate() {
            store.add(text).unwrap();
            if *done {
                store.toggle(i + 1).unwrap();
            }
        }
        let mut config = Config::default();
        config.set_interval(interval).unwrap();
        config.save(&dir).unwrap();
        (temp_dir, dir, store)
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_spawns_one_reminder_after_interval() {
        let (_tmp, dir, store) = setup(&[("A", false), ("B", false)], 1);
        let launcher = RecordingLauncher::new(&dir, window_takes_lock());
        let supervisor = DaemonSupervisor::new(&dir, store, launcher.clone());
        let lock = LockCoordinator::new(&dir);

        let handle = tokio::spawn(async move { supervisor.run().await });

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(launcher.reminder_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(launcher.reminder_count(), 1);
        assert!(lock.is_held());

        // Window left open for a long time: still exactly one reminder
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(launcher.reminder_count(), 1);

        // Window closed: next reminder one full interval later
        lock.release().unwrap();
        tokio::time::sleep(Duration::from_secs(58)).await;
        assert_eq!(launcher.reminder_count(), 1);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(launcher.reminder_count(), 2);

        handle.abort();
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_held_lock_skips_wake() {
        let (_tmp, dir, store) = setup(&[("A", false)], 1);
        let lock = LockCoordinator::new(&dir);
        // A reminder opened by hand is already showing
        lock.acquire_as(1).unwrap();

        let launcher = RecordingLauncher::new(&dir, window_takes_lock());
        let supervisor = DaemonSupervisor::new(&dir, store, launcher.clone());
        let handle = tokio::spawn(async move { supervisor.run().await });

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(launcher.reminder_count(), 0);

        lock.release().unwrap();
        tokio::time::sleep(Duration::from_secs(58)).await;
        assert_eq!(launcher.reminder_count(), 0);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(launcher.reminder_count(), 1);

        handle.abort();
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_finishes_when_everything_is_done() {
        let (_tmp, dir, store) = setup(&[("A", true), ("B", true)], 1);
        let daemon = DaemonManager::new(&dir);
        daemon.register_self().unwrap();
        let lock = LockCoordinator::new(&dir);
        lock.acquire_as(999_999_999).unwrap();

        let launcher = RecordingLauncher::new(&dir, window_takes_lock());
        let supervisor = DaemonSupervisor::new(&dir, store, launcher.clone());

        supervisor.run().await.unwrap();

        assert_eq!(launcher.reminder_count(), 0);
        assert!(!dir.daemon().exists());
        assert!(!lock.is_held());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_tasks_completed_while_sleeping() {
        let (_tmp, dir, store) = setup(&[("A", false)], 1);
        DaemonManager::new(&dir).register_self().unwrap();
        let launcher = RecordingLauncher::new(&dir, window_takes_lock());
        let supervisor = DaemonSupervisor::new(&dir, store.clone(), launcher.clone());

        let handle = tokio::spawn(async move { supervisor.run().await });
        tokio::time::sleep(Duration::from_secs(30)).await;
        store.toggle(1).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(60), handle).await;
        assert!(result.is_ok(), "supervisor should exit on its next wake");
        assert_eq!(launcher.reminder_count(), 0);
        assert!(!dir.daemon().exists());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_unclaimed_handoff_is_cleared() {
        let (_tmp, dir, store) = setup(&[("A", false)], 1);
        // Window never starts
        let launcher = RecordingLauncher::new(&dir, Box::new(|_: &LockCoordinator| {}));
        let supervisor = DaemonSupervisor::new(&dir, store, launcher.clone());
        let lock = LockCoordinator::new(&dir);

        let handle = tokio::spawn(async move { supervisor.run().await });

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(launcher.reminder_count(), 1);
        assert_eq!(lock.holder().unwrap().holder_pid, std::process::id());

        // Grace expires at ~120s, next wake at ~180s
        tokio::time::sleep(Duration::from_secs(62)).await;
        assert!(!lock.is_held());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(launcher.reminder_count(), 2);

        handle.abort();
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_dead_holder_is_cleared() {
        let (_tmp, dir, store) = setup(&[("A", false)], 1);
        let lock = LockCoordinator::new(&dir);
        lock.acquire_as(999_999_999).unwrap();

        let launcher = RecordingLauncher::new(&dir, window_takes_lock());
        let supervisor = DaemonSupervisor::new(&dir, store, launcher.clone());

        let tick = supervisor.tick().await.unwrap();
        assert_eq!(tick, Tick::Skipped);
        assert!(!lock.is_held());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_failed_wake_keeps_daemon_running() {
        let (tmp, dir, store) = setup(&[("A", false)], 1);
        // A directory where the lock file belongs: every lock operation fails
        std::fs::create_dir(dir.lock()).unwrap();
        std::fs::write(dir.lock().join("blocker"), "x").unwrap();

        let launcher = RecordingLauncher::new(&dir, window_takes_lock());
        let supervisor = DaemonSupervisor::new(&dir, store, launcher.clone());
        assert!(supervisor.tick().await.is_err());

        let handle = tokio::spawn(async move { supervisor.run().await });

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!handle.is_finished());
        assert_eq!(launcher.reminder_count(), 0);

        std::fs::remove_dir_all(tmp.path().join("reminder.lock")).unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(launcher.reminder_count(), 1);
        assert!(!handle.is_finished());

        handle.abort();
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_launch_failure_releases_lock() {
        struct BrokenLauncher;
        impl Launcher for BrokenLauncher {
            fn start_daemon(&self) -> Result<u32> {
                Ok(0)
            }
            fn spawn_reminder(&self, _: u32) -> Result<()> {
                Err(eyre::eyre!("no terminal"))
            }
            fn fullscreen(&self) {}
        }

        let (_tmp, dir, store) = setup(&[("A", false)], 1);
        let supervisor = DaemonSupervisor::new(&dir, store, Arc::new(BrokenLauncher));

        assert_eq!(supervisor.tick().await.unwrap(), Tick::LaunchFailed);
        assert!(!LockCoordinator::new(&dir).is_held());
    }
}
