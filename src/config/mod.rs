// src/config/mod.rs

//! Run file loading and validation for fleetrun.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a run file from disk (`loader.rs`).
//! - Validate basic invariants like unique task names (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{
    BackendSection, FileSync, decode_params, FileSyncConfig, RawRunFile, RunFile, TaskConfig,
    DEFAULT_POLL_INTERVAL,
};
pub use validate::parse_duration;
