// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// `collect` was asked for a run that has no index in the namespace.
    #[error("Unknown run: {0}")]
    UnknownRun(String),

    /// The worker pool could not be constructed or reached.
    #[error("Worker pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("Task {key} failed: {reason}")]
    TaskFailed { key: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FleetError {
    /// Shorthand used by validation code.
    pub fn config(msg: impl Into<String>) -> Self {
        FleetError::ConfigError(msg.into())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FleetError>;
