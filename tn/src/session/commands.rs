//! Line commands understood by a session

use thiserror::Error;

use crate::config::MAX_INTERVAL_MINUTES;
use crate::tasks::TaskStoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Add(String),
    Toggle(usize),
    Edit(usize, String),
    Delete(usize),
    Clear,
    List,
    ShowTimer,
    SetTimer(u64),
    Help,
    Exit,
}

impl SessionCommand {
    /// Whether the task list should be shown again after this command
    pub fn rerenders(&self) -> bool {
        !matches!(self, Self::Help | Self::ShowTimer | Self::SetTimer(_) | Self::Exit)
    }
}

/// Problems with what the user typed; reported inline, the session continues
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '{0}' (type 'help')")]
    Unknown(String),

    #[error("'{command}' needs {what}")]
    MissingArgument { command: &'static str, what: &'static str },

    #[error("'{0}' is not a task number")]
    BadIndex(String),

    #[error("'{0}' is not a valid number of minutes (1 to {max})", max = MAX_INTERVAL_MINUTES)]
    BadInterval(String),

    #[error("The timer can only be changed from a session you started yourself")]
    TimerLocked,

    #[error("{0}")]
    Store(String),
}

impl From<TaskStoreError> for CommandError {
    fn from(e: TaskStoreError) -> Self {
        Self::Store(e.to_string())
    }
}

fn index(command: &'static str, arg: Option<&str>) -> Result<usize, CommandError> {
    let arg = arg.ok_or(CommandError::MissingArgument {
        command,
        what: "a task number",
    })?;
    arg.parse::<usize>()
        .ok()
        .filter(|&n| n > 0)
        .ok_or_else(|| CommandError::BadIndex(arg.to_string()))
}

/// Parse one input line
pub fn parse(line: &str) -> Result<SessionCommand, CommandError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let rest_opt = if rest.is_empty() { None } else { Some(rest) };

    match word.to_lowercase().as_str() {
        "" | "list" | "ls" => Ok(SessionCommand::List),
        "add" | "a" => rest_opt
            .map(|text| SessionCommand::Add(text.to_string()))
            .ok_or(CommandError::MissingArgument {
                command: "add",
                what: "the task text",
            }),
        "do" | "x" => Ok(SessionCommand::Toggle(index("do", rest_opt)?)),
        "del" | "rm" => Ok(SessionCommand::Delete(index("del", rest_opt)?)),
        "edit" | "e" => {
            let (n, text) = match rest.split_once(char::is_whitespace) {
                Some((n, text)) => (Some(n), text.trim()),
                None => (rest_opt, ""),
            };
            let n = index("edit", n)?;
            if text.is_empty() {
                return Err(CommandError::MissingArgument {
                    command: "edit",
                    what: "a task number and the new text",
                });
            }
            Ok(SessionCommand::Edit(n, text.to_string()))
        }
        "clear" => Ok(SessionCommand::Clear),
        "timer" | "t" => match rest_opt {
            None => Ok(SessionCommand::ShowTimer),
            Some(arg) => arg
                .parse::<u64>()
                .ok()
                .filter(|&n| (1..=MAX_INTERVAL_MINUTES).contains(&n))
                .map(SessionCommand::SetTimer)
                .ok_or_else(|| CommandError::BadInterval(arg.to_string())),
        },
        "help" | "h" | "?" => Ok(SessionCommand::Help),
        "done" | "quit" | "exit" | "q" => Ok(SessionCommand::Exit),
        _ => Err(CommandError::Unknown(word.to_string())),
    }
}

/// Command summary shown by `help`
pub const HELP: &[(&str, &str)] = &[
    ("add <text>", "Add a task"),
    ("do <n>", "Mark task n done (or not done)"),
    ("edit <n> <text>", "Change the text of task n"),
    ("del <n>", "Delete task n"),
    ("clear", "Delete all finished tasks"),
    ("list", "Show the list again"),
    ("timer [min]", "Show or set the reminder interval"),
    ("done", "Close this window"),
];
