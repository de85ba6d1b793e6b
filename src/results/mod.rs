// src/results/mod.rs

//! Result storage backends.
//!
//! A [`Results`] backend is chosen once per run from the `[results]` section
//! and hands out one [`ResultContext`] per task. The process supervisor only
//! talks to the context:
//!
//! - `stdout_path` / `stderr_path` / `results_dir` are where the task writes;
//! - `sync` is called every poll interval while the task runs;
//! - `set_status` once when the process exits;
//! - `finish` once after the status is set;
//! - `cleanup` exactly once at the very end, on every path.
//!
//! Backends:
//! - [`local`]: writes straight into `<path>/<task>/`.
//! - [`mirror`]: stages output in a private scratch area and copies it to
//!   `<target>/<task>/` on `sync` / `finish`, the way an object store upload
//!   would.

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::BackendSection;
use crate::errors::{FleetError, Result};

pub mod local;
pub mod mirror;
pub mod scratch;

pub use local::LocalResults;
pub use mirror::MirrorResults;
pub use scratch::ScratchArea;

/// Name of the environment variable that points a task at its results dir.
pub const RESULTS_DIR_ENV: &str = "RESULTS_DIR";

/// A results backend for one run.
pub trait Results: Send + Sync + Debug {
    /// Selector name this backend was registered under.
    fn kind(&self) -> &'static str;

    /// Create the private context for one task.
    fn create_context(&self, task: &str) -> Result<Box<dyn ResultContext>>;
}

/// Per-task workspace, owned by exactly one task for its lifetime.
pub trait ResultContext: Send {
    fn task_name(&self) -> &str;

    fn stdout_path(&mut self) -> Result<PathBuf>;

    fn stderr_path(&mut self) -> Result<PathBuf>;

    /// Directory for structured artifacts; created on first access.
    fn results_dir(&mut self) -> Result<PathBuf>;

    /// Push partial output to the backend. May be called any number of times
    /// while the task runs.
    fn sync(&mut self) -> Result<()>;

    fn set_status(&mut self, status: &str) -> Result<()>;

    /// Final artifact sync, after `set_status`.
    fn finish(&mut self) -> Result<()>;

    /// Release the scratch area.
    fn cleanup(&mut self) -> Result<()>;
}

type ResultsFactory = fn(&toml::Table, &str) -> Result<Arc<dyn Results>>;

/// Registered backends, keyed by selector name.
const BACKENDS: &[(&str, ResultsFactory)] = &[
    ("local", local::from_params),
    ("mirror", mirror::from_params),
];

/// Construct the results backend named by `section.kind` for `run_name`.
pub fn create(section: &BackendSection, run_name: &str) -> Result<Arc<dyn Results>> {
    let factory = BACKENDS
        .iter()
        .find(|(name, _)| *name == section.kind)
        .map(|(_, f)| *f)
        .ok_or_else(|| {
            FleetError::config(format!(
                "unknown results backend '{}' (available: {})",
                section.kind,
                available().collect::<Vec<_>>().join(", ")
            ))
        })?;
    factory(&section.params, run_name)
}

pub fn available() -> impl Iterator<Item = &'static str> {
    BACKENDS.iter().map(|(name, _)| *name)
}

/// Replace the `{name}` placeholder in a backend target with the run name.
pub fn substitute_name(template: &str, run_name: &str) -> String {
    template.replace("{name}", run_name)
}
