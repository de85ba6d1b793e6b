// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{RawRunFile, RunFile};
use crate::errors::Result;

/// Load a run file from a given path and return the raw `RawRunFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawRunFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let raw: RawRunFile = toml::from_str(&contents)?;
    Ok(raw)
}

/// Parse and validate a run file held in memory.
pub fn load_from_str(contents: &str) -> Result<RunFile> {
    let raw: RawRunFile = toml::from_str(contents)?;
    RunFile::try_from(raw)
}

/// Load a run file from path and run validation.
///
/// - Reads TOML.
/// - Applies defaults (task names, `dest = src`, poll interval).
/// - Checks task names, commands, file syncs and the poll interval.
///
/// Backend selectors are only checked when the backends are constructed.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<RunFile> {
    let raw = load_from_path(&path)?;
    RunFile::try_from(raw)
}
