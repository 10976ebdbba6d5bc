//! tasknag - task list that nags until the work is done
//!
//! CLI entry point for sessions, the reminder daemon and daemon management.

use std::fs;
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use tasknag::cli::{Cli, Command, DaemonCommand, OutputFormat, generate_after_help};
use tasknag::{
    CommandPlayer, Config, DaemonManager, DaemonSupervisor, JsonTaskStore, LockCoordinator, ProcessLauncher,
    SessionController, SessionInput, SessionKind, StateDir, TaskStore,
};

fn setup_logging(dir: &StateDir, role: &str, cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dir.logs();
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // Sessions and the daemon run side by side, so append rather than truncate
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{}.log", role)))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!(pid = std::process::id(), role, "Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let dir = StateDir::resolve();

    // Build command with dynamic after_help that shows daemon status
    let cmd = Cli::command().after_help(generate_after_help(&dir));
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    dir.ensure()?;
    let role = match cli.command {
        Some(Command::RunDaemon) => "daemon",
        _ => "session",
    };
    let config_log_level = Config::load_log_level(&dir);
    setup_logging(&dir, role, cli.log_level.as_deref(), config_log_level.as_deref())
        .context("Failed to setup logging")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        None => cmd_session(&dir, SessionKind::Initial, None).await,
        Some(Command::Resume) => cmd_session(&dir, SessionKind::Resumed, None).await,
        Some(Command::Remind { handoff }) => cmd_session(&dir, SessionKind::Reminder, handoff).await,
        Some(Command::RunDaemon) => cmd_run_daemon(&dir).await,
        Some(Command::Daemon { command }) => match command {
            DaemonCommand::Start => cmd_start(&dir),
            DaemonCommand::Stop => cmd_stop(&dir),
            DaemonCommand::Status { format } => cmd_status(&dir, format),
        },
    }
}

/// Run one interactive session
async fn cmd_session(dir: &StateDir, kind: SessionKind, handoff: Option<u32>) -> Result<()> {
    debug!(?kind, ?handoff, "cmd_session: called");
    let config = Config::load(dir);
    let store = Arc::new(JsonTaskStore::new(dir));
    let launcher = Arc::new(ProcessLauncher::new(dir, &config));
    let player = Arc::new(CommandPlayer::new(config.alerts.clone()));

    let session = SessionController::new(kind, dir, store, launcher, player)?.with_handoff(handoff);
    let input = SessionInput::console(format!("{} ", ">".bright_green()))?;

    let report = session.run(input).await?;
    debug!(?report, "cmd_session: finished");
    Ok(())
}

/// Internal: the daemon process itself
async fn cmd_run_daemon(dir: &StateDir) -> Result<()> {
    debug!("cmd_run_daemon: called");
    let daemon = DaemonManager::new(dir);
    daemon.register_self()?;

    let config = Config::load(dir);
    let store = Arc::new(JsonTaskStore::new(dir));
    let launcher = Arc::new(ProcessLauncher::new(dir, &config));
    let supervisor = DaemonSupervisor::new(dir, store, launcher);

    info!("Daemon running. SIGTERM to stop.");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let run = supervisor.run();
        tokio::pin!(run);

        loop {
            tokio::select! {
                result = &mut run => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Supervisor loop failed");
                    }
                    break;
                }
                _ = sighup.recv() => {
                    // Outlive the terminal that started us; config is re-read every wake anyway
                    info!("SIGHUP received - ignored");
                }
                _ = sigint.recv() => {
                    warn!("SIGINT received");
                    break;
                }
                _ = sigterm.recv() => {
                    warn!("SIGTERM received");
                    break;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = supervisor.run() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Supervisor loop failed");
                }
            }
            _ = tokio::signal::ctrl_c() => warn!("Ctrl+C received"),
        }
    }

    info!("Daemon shutting down...");
    daemon.unregister_self()?;
    Ok(())
}

/// Start the daemon by hand
fn cmd_start(dir: &StateDir) -> Result<()> {
    debug!("cmd_start: called");
    if !JsonTaskStore::new(dir).has_unfinished() {
        println!("Nothing left to do, daemon not started");
        return Ok(());
    }
    let pid = DaemonManager::new(dir).start()?;
    println!("tasknag daemon started (PID: {})", pid);
    Ok(())
}

/// Stop the daemon
fn cmd_stop(dir: &StateDir) -> Result<()> {
    debug!("cmd_stop: called");
    let daemon = DaemonManager::new(dir);
    match daemon.running_pid() {
        Some(pid) => {
            daemon.stop()?;
            println!("tasknag daemon stopped (was PID: {})", pid);
        }
        None => println!("tasknag daemon is not running"),
    }
    Ok(())
}

/// Show daemon status
fn cmd_status(dir: &StateDir, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_status: called");
    let status = DaemonManager::new(dir).status();
    let lock = LockCoordinator::new(dir).holder();
    let config = Config::load(dir);
    let tasks = JsonTaskStore::new(dir).list();
    let open = tasks.iter().filter(|t| !t.done).count();
    let last_active = dir.last_active_at();

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "running": status.running,
                "pid": status.pid,
                "started_at": status.started_at,
                "pid_file": status.pid_file.to_string_lossy(),
                "reminder_open": lock.is_some(),
                "reminder_pid": lock.as_ref().map(|l| l.holder_pid),
                "interval_minutes": config.interval,
                "tasks": tasks.len(),
                "open_tasks": open,
                "last_active": last_active,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!("tasknag Status");
            println!("--------------");
            match status.pid {
                Some(pid) => println!("Daemon: running (PID {})", pid),
                None => println!("Daemon: stopped"),
            }
            if let Some(started_at) = status.started_at {
                println!("Started: {}", started_at.to_rfc3339());
            }
            match &lock {
                Some(record) => println!("Reminder: open (PID {})", record.holder_pid),
                None => println!("Reminder: none"),
            }
            println!("Interval: {} minutes", config.interval);
            println!("Tasks: {} ({} open)", tasks.len(), open);
            if let Some(ts) = last_active {
                println!("Last active: {}", ts.to_rfc3339());
            }
            println!("State directory: {}", dir.root().display());
        }
    }

    Ok(())
}
