//! Session input: typed lines and OS signals on one channel
//!
//! Signals are not handled out of band. They arrive as ordinary
//! [`SessionEvent`]s next to the lines the user types.

use std::sync::mpsc as std_mpsc;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Interrupt,
    Terminate,
    Hangup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Line(String),
    Eof,
    Signal(SignalKind),
}

/// Stream of events feeding a session
pub struct SessionInput {
    events: mpsc::Receiver<SessionEvent>,
    /// Tells the reader thread to prompt for the next line
    ready: Option<std_mpsc::Sender<()>>,
}

impl SessionInput {
    /// Input fed by hand; used by tests and embedders
    pub fn channel(capacity: usize) -> (mpsc::Sender<SessionEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { events: rx, ready: None })
    }

    /// Interactive input from the terminal plus SIGINT/SIGTERM/SIGHUP
    ///
    /// Must be called from within a tokio runtime.
    pub fn console(prompt: String) -> eyre::Result<Self> {
        let (tx, rx) = mpsc::channel(16);
        let (ready_tx, ready_rx) = std_mpsc::channel::<()>();

        spawn_signal_forwarder(tx.clone())?;

        let reader_tx = tx;
        std::thread::Builder::new()
            .name("readline".to_string())
            .spawn(move || read_lines(prompt, reader_tx, ready_rx))?;

        Ok(Self {
            events: rx,
            ready: Some(ready_tx),
        })
    }

    /// Ask for the next line; the reader stays idle until this is called
    pub fn request_line(&self) {
        if let Some(ready) = &self.ready {
            let _ = ready.send(());
        }
    }

    /// Next event; a closed input reads as end-of-file
    pub async fn next(&mut self) -> SessionEvent {
        self.events.recv().await.unwrap_or(SessionEvent::Eof)
    }
}

fn read_lines(prompt: String, tx: mpsc::Sender<SessionEvent>, ready: std_mpsc::Receiver<()>) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            warn!(error = %e, "Failed to initialize readline");
            let _ = tx.blocking_send(SessionEvent::Eof);
            return;
        }
    };

    // Blocks until the session wants another line, or has gone away
    while ready.recv().is_ok() {
        let event = match rl.readline(&prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                SessionEvent::Line(line)
            }
            // Ctrl+C inside the editor
            Err(ReadlineError::Interrupted) => SessionEvent::Signal(SignalKind::Interrupt),
            Err(ReadlineError::Eof) => SessionEvent::Eof,
            Err(e) => {
                warn!(error = %e, "Readline error, treating as end of input");
                SessionEvent::Eof
            }
        };
        let last = !matches!(event, SessionEvent::Line(_));
        if tx.blocking_send(event).is_err() || last {
            break;
        }
    }
    debug!("read_lines: reader finished");
}

#[cfg(unix)]
fn spawn_signal_forwarder(tx: mpsc::Sender<SessionEvent>) -> eyre::Result<()> {
    use tokio::signal::unix::{SignalKind as Kind, signal};

    let mut sigint = signal(Kind::interrupt())?;
    let mut sigterm = signal(Kind::terminate())?;
    let mut sighup = signal(Kind::hangup())?;

    tokio::spawn(async move {
        loop {
            let kind = tokio::select! {
                _ = sigint.recv() => SignalKind::Interrupt,
                _ = sigterm.recv() => SignalKind::Terminate,
                _ = sighup.recv() => SignalKind::Hangup,
            };
            debug!(?kind, "signal received");
            if tx.send(SessionEvent::Signal(kind)).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_forwarder(tx: mpsc::Sender<SessionEvent>) -> eyre::Result<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(SessionEvent::Signal(SignalKind::Interrupt)).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}
