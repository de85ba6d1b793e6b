// src/process/mod.rs

//! Local process supervision.
//!
//! - [`supervisor`] runs one task command on the current worker, wakes up
//!   every poll interval to sync partial output, and drives the
//!   `ResultContext` lifecycle.
//! - [`reaper`] owns the process-wide set of running task pids and the
//!   process-tree cleanup used on worker teardown.

pub mod reaper;
pub mod supervisor;

pub use reaper::{ProcessTable, ReapError, SystemProcessTable, cleanup, cleanup_all, running_pids};
pub use supervisor::{build_command, execute};
