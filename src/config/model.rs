// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::Result;
use crate::tasks::{TaskCommand, TaskSpec};

/// Supervisor poll interval used when the run file does not set one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Top-level run file as read from TOML.
///
/// ```toml
/// prefix = "nightly"
/// poll_interval = "30s"
///
/// [results]
/// kind = "local"
/// path = "/data/results/{name}"
///
/// [executor]
/// kind = "local"
/// workers = 4
///
/// [[file_sync]]
/// src = "/home/me/project"
///
/// [[task]]
/// name = "a"
/// command = "python train.py"
/// shell = true
/// ```
///
/// This is the unchecked shape; [`RunFile`] is what the rest of the crate
/// works with.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRunFile {
    /// Explicit run name. Mutually exclusive with `prefix`.
    #[serde(default)]
    pub name: Option<String>,

    /// Run name prefix; a UTC timestamp is appended at run start.
    #[serde(default)]
    pub prefix: Option<String>,

    /// Supervisor poll interval, e.g. `"30s"` or `"500ms"`.
    #[serde(default)]
    pub poll_interval: Option<String>,

    /// `[results]` backend selector + parameters.
    pub results: BackendSection,

    /// `[executor]` worker-pool selector + parameters.
    pub executor: BackendSection,

    /// `[[file_sync]]` entries broadcast to every worker before submission.
    #[serde(default)]
    pub file_sync: Vec<FileSyncConfig>,

    /// `[[task]]` entries, in submission order.
    #[serde(default)]
    pub task: Vec<TaskConfig>,
}

/// A backend selector: `kind` picks the constructor, everything else in the
/// table is handed to it as parameters.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BackendSection {
    pub kind: String,

    #[serde(flatten)]
    pub params: toml::Table,
}

impl BackendSection {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: toml::Table::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Typed view of a backend's parameter table.
pub fn decode_params<T: serde::de::DeserializeOwned>(table: &toml::Table) -> Result<T> {
    let value = toml::Value::Table(table.clone());
    Ok(value.try_into()?)
}

/// `[[file_sync]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct FileSyncConfig {
    pub src: String,

    /// Defaults to `src`.
    #[serde(default)]
    pub dest: Option<String>,
}

/// `[[task]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Defaults to the task's index in the file.
    #[serde(default)]
    pub name: Option<String>,

    pub command: TaskCommand,

    #[serde(default)]
    pub shell: bool,
}

/// A local path to push to every worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSync {
    pub src: PathBuf,
    pub dest: PathBuf,
}

impl FileSync {
    pub fn same(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            src: path.clone(),
            dest: path,
        }
    }
}

impl From<FileSyncConfig> for FileSync {
    fn from(cfg: FileSyncConfig) -> Self {
        let dest = cfg.dest.unwrap_or_else(|| cfg.src.clone());
        Self {
            src: PathBuf::from(cfg.src),
            dest: PathBuf::from(dest),
        }
    }
}

/// Validated run file.
///
/// Only constructed through `TryFrom<RawRunFile>` (see `validate.rs`), so
/// task names are unique and every file sync has `src == dest`.
#[derive(Debug, Clone)]
pub struct RunFile {
    pub name: Option<String>,
    pub prefix: Option<String>,
    pub poll_interval: Duration,
    pub results: BackendSection,
    pub executor: BackendSection,
    pub file_syncs: Vec<FileSync>,
    pub tasks: Vec<TaskSpec>,
}
