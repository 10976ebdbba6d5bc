//! tasknag - a task list that nags until the work is done
//!
//! A foreground session shows the list and accepts edits. When it closes,
//! for any reason, a background daemon takes over: it sleeps for the
//! configured interval and then reopens the list in a new window with an
//! alarm that escalates until somebody responds.
//!
//! # Core Concepts
//!
//! - **Filesystem as IPC**: sessions and the daemon share nothing but the
//!   files in the state directory
//! - **One reminder at a time**: the reminder lock marks an open reminder
//! - **Every exit is the same exit**: typing `done`, Ctrl+C and closing the
//!   window all hand scheduling back to the daemon
//!
//! # Modules
//!
//! - [`state`] - State directory and atomic writes
//! - [`config`] - Configuration types and loading
//! - [`tasks`] - Task store
//! - [`lock`] - Reminder lock
//! - [`alarm`] - Escalating alarm
//! - [`daemon`] - Daemon handle and process control
//! - [`supervisor`] - Daemon loop
//! - [`session`] - Interactive sessions
//! - [`cli`] - Command-line interface

pub mod alarm;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod launcher;
pub mod lock;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod tasks;

// Re-export commonly used types
pub use alarm::{AlarmEscalator, AlertKind, AlertPlayer, CommandPlayer, PlayOutcome};
pub use config::Config;
pub use daemon::{DaemonHandle, DaemonManager, DaemonStatus};
pub use launcher::{Launcher, ProcessLauncher};
pub use lock::{LockCoordinator, LockError, LockGuard, LockRecord};
pub use session::{ExitReason, SessionController, SessionEvent, SessionInput, SessionKind, SessionReport, SignalKind};
pub use state::StateDir;
pub use supervisor::{DaemonSupervisor, Tick};
pub use tasks::{JsonTaskStore, Task, TaskStore, TaskStoreError};
