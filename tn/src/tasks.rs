//! Task store
//!
//! The ordered task list lives in `tasks.json`. Every operation re-reads the
//! file so that sessions and the daemon always act on what is on disk.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::state::{StateDir, write_atomic};

/// A single task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub text: String,
    #[serde(default)]
    pub done: bool,
}

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
        }
    }
}

/// Errors from task store operations
#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("No task number {index} (list has {len})")]
    NoSuchTask { index: usize, len: usize },

    #[error("Task text cannot be empty")]
    EmptyText,

    #[error("Store error: {0}")]
    Io(String),
}

/// Read side used by the scheduling core, plus the CRUD surface used by sessions
///
/// Indices are 1-based, matching what the user sees.
pub trait TaskStore: Send + Sync {
    fn list(&self) -> Vec<Task>;

    fn has_unfinished(&self) -> bool {
        self.list().iter().any(|t| !t.done)
    }

    fn add(&self, text: &str) -> Result<(), TaskStoreError>;
    fn toggle(&self, index: usize) -> Result<bool, TaskStoreError>;
    fn edit(&self, index: usize, text: &str) -> Result<(), TaskStoreError>;
    fn remove(&self, index: usize) -> Result<Task, TaskStoreError>;
    fn clear_done(&self) -> Result<usize, TaskStoreError>;
}

/// JSON-file backed task store
#[derive(Debug, Clone)]
pub struct JsonTaskStore {
    path: PathBuf,
}

impl JsonTaskStore {
    pub fn new(dir: &StateDir) -> Self {
        Self { path: dir.tasks() }
    }

    fn load(&self) -> Vec<Task> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %e, "Failed to read task store, treating as empty");
                }
                return Vec::new();
            }
        };
        if content.trim().is_empty() {
            return Vec::new();
        }
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(error = %e, path = %self.path.display(), "Task store is corrupt, treating as empty");
            Vec::new()
        })
    }

    fn save(&self, tasks: &[Task]) -> Result<(), TaskStoreError> {
        let content = serde_json::to_string_pretty(tasks).map_err(|e| TaskStoreError::Io(e.to_string()))?;
        write_atomic(&self.path, &content).map_err(|e| TaskStoreError::Io(format!("{:#}", e)))
    }

    fn modify<T>(&self, f: impl FnOnce(&mut Vec<Task>) -> Result<T, TaskStoreError>) -> Result<T, TaskStoreError> {
        let mut tasks = self.load();
        let result = f(&mut tasks)?;
        self.save(&tasks)?;
        Ok(result)
    }
}

fn slot(len: usize, index: usize) -> Result<usize, TaskStoreError> {
    if index == 0 || index > len {
        return Err(TaskStoreError::NoSuchTask { index, len });
    }
    Ok(index - 1)
}

fn clean_text(text: &str) -> Result<String, TaskStoreError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(TaskStoreError::EmptyText);
    }
    Ok(text.to_string())
}

impl TaskStore for JsonTaskStore {
    fn list(&self) -> Vec<Task> {
        self.load()
    }

    fn add(&self, text: &str) -> Result<(), TaskStoreError> {
        let text = clean_text(text)?;
        debug!(%text, "JsonTaskStore::add: called");
        self.modify(|tasks| {
            tasks.push(Task::new(text));
            Ok(())
        })
    }

    fn toggle(&self, index: usize) -> Result<bool, TaskStoreError> {
        debug!(index, "JsonTaskStore::toggle: called");
        self.modify(|tasks| {
            let i = slot(tasks.len(), index)?;
            tasks[i].done = !tasks[i].done;
            Ok(tasks[i].done)
        })
    }

    fn edit(&self, index: usize, text: &str) -> Result<(), TaskStoreError> {
        let text = clean_text(text)?;
        self.modify(|tasks| {
            let i = slot(tasks.len(), index)?;
            tasks[i].text = text;
            Ok(())
        })
    }

    fn remove(&self, index: usize) -> Result<Task, TaskStoreError> {
        debug!(index, "JsonTaskStore::remove: called");
        self.modify(|tasks| {
            let i = slot(tasks.len(), index)?;
            Ok(tasks.remove(i))
        })
    }

    fn clear_done(&self) -> Result<usize, TaskStoreError> {
        self.modify(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| !t.done);
            Ok(before - tasks.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, JsonTaskStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonTaskStore::new(&StateDir::at(temp_dir.path()));
        (temp_dir, store)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (_tmp, store) = store();
        assert!(store.list().is_empty());
        assert!(!store.has_unfinished());
    }

    #[test]
    fn test_crud_cycle() {
        let (_tmp, store) = store();

        store.add("A").unwrap();
        store.add("  B  ").unwrap();
        assert_eq!(store.list(), vec![Task::new("A"), Task::new("B")]);

        assert!(store.toggle(1).unwrap());
        assert!(store.has_unfinished());
        store.edit(2, "B2").unwrap();
        assert_eq!(store.list()[1].text, "B2");

        assert_eq!(store.clear_done().unwrap(), 1);
        assert_eq!(store.list(), vec![Task::new("B2")]);

        let removed = store.remove(1).unwrap();
        assert_eq!(removed.text, "B2");
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_all_done_means_nothing_unfinished() {
        let (_tmp, store) = store();
        store.add("A").unwrap();
        store.add("B").unwrap();
        store.toggle(1).unwrap();
        store.toggle(2).unwrap();

        assert!(!store.has_unfinished());
    }

    #[test]
    fn test_bad_index_is_reported() {
        let (_tmp, store) = store();
        store.add("A").unwrap();

        assert!(matches!(store.toggle(0), Err(TaskStoreError::NoSuchTask { index: 0, len: 1 })));
        assert!(matches!(store.remove(2), Err(TaskStoreError::NoSuchTask { index: 2, len: 1 })));
        assert!(matches!(store.add("   "), Err(TaskStoreError::EmptyText)));
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let (tmp, store) = store();
        fs::write(tmp.path().join("tasks.json"), "{ not json").unwrap();

        assert!(store.list().is_empty());
        // Writing replaces the corrupt content
        store.add("fresh").unwrap();
        assert_eq!(store.list(), vec![Task::new("fresh")]);
    }

    #[test]
    fn test_done_defaults_to_false() {
        let (tmp, store) = store();
        fs::write(tmp.path().join("tasks.json"), r#"[{"text": "legacy"}]"#).unwrap();

        assert!(store.has_unfinished());
    }
}
