//! Interactive foreground sessions
//!
//! Initial, resumed and reminder sessions all share one state machine; they
//! differ only in whether they take the reminder lock and sound the alarm, and
//! in whether they start the daemon on the way out.

mod commands;
mod controller;
mod input;

pub use commands::{CommandError, HELP, SessionCommand, parse};
pub use controller::{DEFAULT_SETTLE, ExitReason, SessionController, SessionKind, SessionReport, SessionState};
pub use input::{SessionEvent, SessionInput, SignalKind};
