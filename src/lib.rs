// src/lib.rs

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod drain;
pub mod errors;
pub mod logging;
pub mod pool;
pub mod process;
pub mod results;
pub mod run;
pub mod tasks;

use std::path::Path;

use anyhow::Result;
use tracing::{debug, warn};

use crate::cli::{CliArgs, Command, RunArgs};
use crate::config::{RunFile, load_and_validate};
use crate::drain::DrainReport;
use crate::run::{RunCoordinator, RunIdentity};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - run file loading and identity resolution
/// - results backend and worker pool construction
/// - broadcast, submit and drain
/// - Ctrl-C handling (sweeps running task processes)
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Run(run_args) => run_file(run_args).await,
    }
}

async fn run_file(args: RunArgs) -> Result<()> {
    let run = load_and_validate(Path::new(&args.run_file))?;
    let identity = RunIdentity::for_run(&run, args.name.as_deref(), args.prefix.as_deref())?;

    if args.dry_run {
        print_dry_run(&run, &identity);
        return Ok(());
    }

    let coordinator = RunCoordinator::new(run, identity)?;

    tokio::select! {
        report = coordinator.execute(args.clean) => {
            coordinator.shutdown().await;
            print_summary(&report?);
            Ok(())
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for Ctrl+C");
            }
            warn!(run = %coordinator.name(), "interrupted; cleaning up running tasks");
            coordinator.shutdown().await;
            anyhow::bail!("run {} interrupted", coordinator.name())
        }
    }
}

fn print_summary(report: &DrainReport) {
    println!("run {}", report.run);
    println!(
        "  succeeded: {}  failed: {}  skipped: {}",
        report.succeeded.len(),
        report.failed.len(),
        report.skipped.len()
    );
    for ok in &report.succeeded {
        println!("  ok    {} (status {})", ok.task, ok.status);
    }
    for failure in &report.failed {
        println!("  FAIL  {failure}");
    }
}

/// Simple dry-run output: identity, backends and tasks.
fn print_dry_run(run: &RunFile, identity: &RunIdentity) {
    println!("fleetrun dry-run");
    println!("  name = {}", identity.name);
    println!("  poll_interval = {:?}", run.poll_interval);
    println!("  results = {}", run.results.kind);
    println!("  executor = {}", run.executor.kind);
    println!();

    if !run.file_syncs.is_empty() {
        println!("file_sync ({}):", run.file_syncs.len());
        for sync in &run.file_syncs {
            println!("  - {}", sync.src.display());
        }
        println!();
    }

    println!("tasks ({}):", run.tasks.len());
    for task in &run.tasks {
        println!("  - {}", task.name);
        println!("      cmd: {}", task.command);
        if task.shell {
            println!("      shell: true");
        }
    }

    debug!("dry-run complete (no execution)");
}
