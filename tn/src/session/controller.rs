//! One interactive session
//!
//! A session runs `Starting -> Running -> Closing*` and then always passes
//! through [`SessionController::finish`], which releases the reminder lock
//! and, for ordinary sessions, hands scheduling back to the daemon.

use std::fmt::Display;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use eyre::Result;
use tracing::{debug, info, warn};

use super::commands::{self, CommandError, HELP, SessionCommand};
use super::input::{SessionEvent, SessionInput, SignalKind};
use crate::alarm::{AlarmEscalator, AlertPlayer};
use crate::config::Config;
use crate::launcher::Launcher;
use crate::lock::{LockCoordinator, LockError, LockGuard};
use crate::state::StateDir;
use crate::tasks::TaskStore;

/// Pause between releasing the lock and starting the daemon
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(1);

/// How the session was launched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Started by the user
    Initial,
    /// Started automatically, e.g. from a shell profile
    Resumed,
    /// Started by the daemon to show a reminder
    Reminder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    ClosingNormal,
    ClosingSignaled,
}

/// Why the session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Explicit exit command
    Command,
    Signal(SignalKind),
    Eof,
    /// Reminder launched with no unfinished tasks
    NothingToRemind,
    /// Another reminder window already holds the lock
    AlreadyShowing,
    /// The session loop failed; cleanup still ran
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub kind: SessionKind,
    pub exit: ExitReason,
    /// PID of the daemon started on the way out, if any
    pub daemon_pid: Option<u32>,
}

pub struct SessionController {
    kind: SessionKind,
    dir: StateDir,
    config: Config,
    timer_unlocked: bool,
    store: Arc<dyn TaskStore>,
    launcher: Arc<dyn Launcher>,
    alarm: AlarmEscalator,
    lock: LockCoordinator,
    guard: Option<LockGuard>,
    handoff_pid: Option<u32>,
    out: Box<dyn Write + Send>,
    state: SessionState,
    daemon_should_start: bool,
    settle: Duration,
}

impl SessionController {
    /// Build a session; creates the config on first run
    pub fn new(
        kind: SessionKind,
        dir: &StateDir,
        store: Arc<dyn TaskStore>,
        launcher: Arc<dyn Launcher>,
        player: Arc<dyn AlertPlayer>,
    ) -> Result<Self> {
        dir.ensure()?;
        let (config, first_run) = Config::load_or_init(dir)?;
        // Reminders never change the timer, even on a fresh install
        let timer_unlocked = kind != SessionKind::Reminder && (first_run || kind == SessionKind::Initial);
        debug!(?kind, first_run, timer_unlocked, "SessionController::new: called");

        Ok(Self {
            kind,
            dir: dir.clone(),
            config,
            timer_unlocked,
            store,
            launcher,
            alarm: AlarmEscalator::new(player),
            lock: LockCoordinator::new(dir),
            guard: None,
            handoff_pid: None,
            out: Box::new(std::io::stdout()),
            state: SessionState::Starting,
            daemon_should_start: false,
            settle: DEFAULT_SETTLE,
        })
    }

    pub fn with_output(mut self, out: Box<dyn Write + Send>) -> Self {
        self.out = out;
        self
    }

    /// PID that may hand this reminder its lock
    pub fn with_handoff(mut self, pid: Option<u32>) -> Self {
        self.handoff_pid = pid;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn timer_unlocked(&self) -> bool {
        self.timer_unlocked
    }

    /// A handle that can silence this session's alarm from elsewhere
    pub fn alarm(&self) -> AlarmEscalator {
        self.alarm.clone()
    }

    /// Run the session to completion
    pub async fn run(mut self, mut input: SessionInput) -> Result<SessionReport> {
        info!(kind = ?self.kind, "Session starting");
        if let Err(e) = self.dir.touch_last_active() {
            warn!(error = %e, "Failed to update last-active marker");
        }

        let outcome = self.drive(&mut input).await;
        let exit = match &outcome {
            Ok(exit) => *exit,
            Err(e) => {
                warn!(error = %e, "Session failed");
                ExitReason::Failed
            }
        };
        // Stop reading before cleanup so the terminal is left alone
        drop(input);

        let report = self.finish(exit).await;
        info!(?report, "Session finished");
        outcome.map(|_| report)
    }

    async fn drive(&mut self, input: &mut SessionInput) -> Result<ExitReason> {
        if self.kind == SessionKind::Reminder {
            if let Some(exit) = self.start_reminder()? {
                return Ok(exit);
            }
        }

        self.state = SessionState::Running;
        self.print_banner();
        self.render();

        loop {
            input.request_line();
            match input.next().await {
                SessionEvent::Line(line) => {
                    // Any response at all silences the alarm
                    if self.kind == SessionKind::Reminder && self.alarm.is_beeping() {
                        self.alarm.stop();
                    }
                    match commands::parse(&line) {
                        Ok(SessionCommand::Exit) => {
                            self.close(SessionState::ClosingNormal);
                            return Ok(ExitReason::Command);
                        }
                        Ok(command) => {
                            let rerender = command.rerenders();
                            if let Err(e) = self.execute(command) {
                                self.say(format!("{} {}", "!".yellow(), e));
                            }
                            if rerender {
                                self.render();
                            }
                        }
                        Err(e) => {
                            self.say(format!("{} {}", "?".yellow(), e));
                            self.render();
                        }
                    }
                }
                SessionEvent::Eof => {
                    self.close(SessionState::ClosingSignaled);
                    return Ok(ExitReason::Eof);
                }
                SessionEvent::Signal(kind) => {
                    info!(?kind, "Session interrupted by signal");
                    self.close(SessionState::ClosingSignaled);
                    return Ok(ExitReason::Signal(kind));
                }
            }
        }
    }

    /// Reminder-only part of `Starting`; `Some` means exit straight away
    fn start_reminder(&mut self) -> Result<Option<ExitReason>> {
        if !self.store.has_unfinished() {
            info!("Reminder launched with nothing to remind about");
            // The daemon may have taken the lock on our behalf
            if let Some(pid) = self.handoff_pid {
                self.lock.release_if_held_by(pid)?;
            }
            return Ok(Some(ExitReason::NothingToRemind));
        }

        match self.lock.claim(self.handoff_pid) {
            Ok(guard) => self.guard = Some(guard),
            Err(LockError::AlreadyLocked { holder_pid }) => {
                info!(?holder_pid, "Another reminder is already showing");
                return Ok(Some(ExitReason::AlreadyShowing));
            }
            Err(e) => return Err(e.into()),
        }

        self.launcher.fullscreen();
        self.alarm.start();
        Ok(None)
    }

    fn close(&mut self, state: SessionState) {
        debug!(?state, "SessionController::close: called");
        self.state = state;
        if self.kind == SessionKind::Reminder {
            self.alarm.stop();
        } else {
            self.daemon_should_start = true;
        }
    }

    /// Terminal cleanup, reached on every path out of the session
    async fn finish(&mut self, exit: ExitReason) -> SessionReport {
        if self.kind != SessionKind::Reminder && self.state == SessionState::Running {
            // Failed mid-session: still hand scheduling back to the daemon
            self.daemon_should_start = true;
        }
        self.alarm.stop();

        // Lock first, so a freshly started daemon never sees our stale lock
        if let Some(mut guard) = self.guard.take()
            && let Err(e) = guard.release()
        {
            warn!(error = %e, "Failed to release reminder lock");
        }

        let mut daemon_pid = None;
        if self.kind != SessionKind::Reminder && self.daemon_should_start {
            if self.store.has_unfinished() {
                tokio::time::sleep(self.settle).await;
                match self.launcher.start_daemon() {
                    Ok(pid) => daemon_pid = Some(pid),
                    Err(e) => warn!(error = %e, "Failed to start daemon"),
                }
            } else {
                debug!("SessionController::finish: nothing unfinished, daemon not started");
            }
        }

        SessionReport {
            kind: self.kind,
            exit,
            daemon_pid,
        }
    }

    fn execute(&mut self, command: SessionCommand) -> Result<(), CommandError> {
        debug!(?command, "SessionController::execute: called");
        match command {
            SessionCommand::Add(text) => self.store.add(&text)?,
            SessionCommand::Toggle(n) => {
                self.store.toggle(n)?;
            }
            SessionCommand::Edit(n, text) => self.store.edit(n, &text)?,
            SessionCommand::Delete(n) => {
                self.store.remove(n)?;
            }
            SessionCommand::Clear => {
                let removed = self.store.clear_done()?;
                self.say(format!("Removed {} finished task(s)", removed));
            }
            SessionCommand::List => {}
            SessionCommand::ShowTimer => {
                let text = format!("Reminder interval: {} minutes", self.config.interval);
                self.say(text);
            }
            SessionCommand::SetTimer(minutes) => {
                if !self.timer_unlocked {
                    return Err(CommandError::TimerLocked);
                }
                // Pick up edits made by other sessions before writing back
                let mut config = Config::load(&self.dir);
                config
                    .set_interval(minutes)
                    .map_err(|e| CommandError::BadInterval(e.to_string()))?;
                config.save(&self.dir).map_err(|e| CommandError::Store(format!("{:#}", e)))?;
                self.config = config;
                info!(minutes, "Reminder interval changed");
                self.say(format!("Reminder interval set to {} minutes", minutes));
            }
            SessionCommand::Help => self.print_help(),
            SessionCommand::Exit => {}
        }
        Ok(())
    }

    fn say(&mut self, text: impl Display) {
        // The terminal may already be gone (hangup); output is best effort
        let _ = writeln!(self.out, "{}", text);
        let _ = self.out.flush();
    }

    fn print_banner(&mut self) {
        if self.kind == SessionKind::Reminder {
            self.say("");
            self.say(format!("{}", "Time to look at your tasks!".bright_red().bold()));
            self.say(format!("{}", "(type anything to silence the alarm)".dimmed()));
        } else {
            self.say(format!(
                "{} {}",
                "tasknag".bright_cyan().bold(),
                format!("- reminding every {} minutes, type 'help' for commands", self.config.interval).dimmed()
            ));
        }
    }

    fn print_help(&mut self) {
        self.say(format!("{}", "Commands:".bright_cyan()));
        for (usage, about) in HELP {
            self.say(format!("  {:18} {}", usage.yellow(), about));
        }
    }

    fn render(&mut self) {
        let tasks = self.store.list();
        self.say("");
        if tasks.is_empty() {
            self.say(format!("  {}", "No tasks. Add one with 'add <text>'.".dimmed()));
            self.say("");
            return;
        }

        let open = tasks.iter().filter(|t| !t.done).count();
        self.say(format!("  {} ({} open)", "Tasks".bold(), open));
        for (i, task) in tasks.iter().enumerate() {
            let line = if task.done {
                format!("  {:>3}. [x] {}", i + 1, task.text.dimmed().strikethrough())
            } else {
                format!("  {:>3}. [ ] {}", i + 1, task.text)
            };
            self.say(line);
        }
        self.say("");
    }
}
