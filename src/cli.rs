// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `fleetrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "fleetrun",
    version,
    about = "Run a batch of independent commands across a pool of workers.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLEETRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Execute a run from the definition in RUN_FILE.
    Run(RunArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to the run file (TOML).
    #[arg(value_name = "RUN_FILE")]
    pub run_file: String,

    /// Explicit run name; replaces the run file's `name`/`prefix`.
    #[arg(long, conflicts_with = "prefix")]
    pub name: Option<String>,

    /// Run name prefix; a UTC timestamp is appended at run start.
    #[arg(long)]
    pub prefix: Option<String>,

    /// Remove any namespace entries left over from a previous run with the
    /// same name before submitting.
    #[arg(long)]
    pub clean: bool,

    /// Parse + validate, print the resolved run, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
