// src/tasks.rs

//! Task specifications: what a single unit of work runs.

use std::fmt;

use serde::Deserialize;

/// The command of a task, either one string or an argument vector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum TaskCommand {
    Line(String),
    Argv(Vec<String>),
}

impl TaskCommand {
    pub fn is_empty(&self) -> bool {
        match self {
            TaskCommand::Line(s) => s.trim().is_empty(),
            TaskCommand::Argv(argv) => argv.is_empty() || argv[0].trim().is_empty(),
        }
    }

    /// Stable textual form used for hashing and logging.
    pub fn display_line(&self) -> String {
        match self {
            TaskCommand::Line(s) => s.clone(),
            TaskCommand::Argv(argv) => argv.join(" "),
        }
    }
}

impl From<&str> for TaskCommand {
    fn from(s: &str) -> Self {
        TaskCommand::Line(s.to_string())
    }
}

impl From<Vec<String>> for TaskCommand {
    fn from(argv: Vec<String>) -> Self {
        TaskCommand::Argv(argv)
    }
}

impl fmt::Display for TaskCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_line())
    }
}

/// One task of a run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: String,
    pub command: TaskCommand,
    pub shell: bool,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, command: impl Into<TaskCommand>, shell: bool) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            shell,
        }
    }

    /// Build a spec from its position in the run file; unnamed tasks are
    /// named after their index.
    pub fn from_position(
        index: usize,
        name: Option<String>,
        command: TaskCommand,
        shell: bool,
    ) -> Self {
        let name = match name {
            Some(n) if !n.is_empty() => n,
            _ => index.to_string(),
        };
        Self {
            name,
            command,
            shell,
        }
    }
}
