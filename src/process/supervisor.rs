// src/process/supervisor.rs

//! Run one task command on the current worker.

use std::fs::File;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::Context;
use tokio::process::Command;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

use crate::errors::{FleetError, Result};
use crate::process::reaper::RunningPid;
use crate::results::{RESULTS_DIR_ENV, ResultContext};
use crate::tasks::TaskCommand;

/// Run `command` to completion, writing its output through `ctx`.
///
/// - stdout/stderr go to the context's files; `RESULTS_DIR` points at the
///   context's results directory.
/// - Every `poll_interval` without an exit, `ctx.sync()` is called. A failed
///   sync is logged and the task keeps running.
/// - On exit the status (exit code, or `-<signal>`) is recorded with
///   `set_status`, then `finish` runs.
/// - `cleanup` runs exactly once on every path, including spawn failures.
/// - Context calls that copy files run via `block_in_place` on a
///   multi-threaded runtime so other jobs keep their thread.
///
/// A non-zero exit is not an error; it is the returned status.
pub async fn execute(
    ctx: &mut dyn ResultContext,
    command: &TaskCommand,
    shell: bool,
    poll_interval: Duration,
) -> Result<String> {
    let outcome = match supervise(ctx, command, shell, poll_interval).await {
        Ok(status) => off_runtime(|| ctx.finish()).map(|()| status),
        Err(e) => Err(e),
    };

    let cleaned = off_runtime(|| ctx.cleanup());
    match (outcome, cleaned) {
        (Ok(status), Ok(())) => Ok(status),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup_err)) => {
            warn!(task = %ctx.task_name(), error = %cleanup_err, "cleanup failed after task error");
            Err(e)
        }
    }
}

async fn supervise(
    ctx: &mut dyn ResultContext,
    command: &TaskCommand,
    shell: bool,
    poll_interval: Duration,
) -> Result<String> {
    let task = ctx.task_name().to_string();

    let stdout_path = ctx.stdout_path()?;
    let stderr_path = ctx.stderr_path()?;
    let results_dir = ctx.results_dir()?;

    let stdout = File::create(&stdout_path)
        .with_context(|| format!("opening stdout file {:?}", stdout_path))?;
    let stderr = File::create(&stderr_path)
        .with_context(|| format!("opening stderr file {:?}", stderr_path))?;

    let mut cmd = build_command(command, shell)?;
    cmd.stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .stdin(Stdio::null())
        .env(RESULTS_DIR_ENV, &results_dir)
        .kill_on_drop(true);

    info!(task = %task, cmd = %command, shell, "starting task process");

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", task))?;

    let guard = child.id().map(RunningPid::register);

    let status = loop {
        match tokio::time::timeout(poll_interval, child.wait()).await {
            Ok(waited) => {
                break waited
                    .with_context(|| format!("waiting for process of task '{}'", task))?;
            }
            Err(_elapsed) => {
                debug!(task = %task, "sync");
                if let Err(e) = off_runtime(|| ctx.sync()) {
                    warn!(task = %task, error = %e, "sync failed; will retry next poll");
                }
            }
        }
    };
    drop(guard);

    let status = status_string(status);
    info!(task = %task, status = %status, "task process exited");
    ctx.set_status(&status)?;
    Ok(status)
}

/// Run blocking filesystem work without holding a runtime worker thread.
/// A current-thread runtime cannot hand its thread off, so `f` runs inline.
fn off_runtime<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Build the OS command for a task.
///
/// - shell + line: `sh -c <line>`
/// - shell + argv: `sh -c "<argv joined by spaces>"`
/// - no shell + line: the line is split shell-style into argv
/// - no shell + argv: executed directly
pub fn build_command(command: &TaskCommand, shell: bool) -> Result<Command> {
    if shell {
        let line = command.display_line();
        let cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(line);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(line);
            c
        };
        return Ok(cmd);
    }

    let argv = match command {
        TaskCommand::Argv(argv) => argv.clone(),
        TaskCommand::Line(line) => shlex::split(line).ok_or_else(|| {
            FleetError::config(format!("cannot split command into arguments: {line:?}"))
        })?,
    };
    let Some((program, args)) = argv.split_first() else {
        return Err(FleetError::config("empty command"));
    };

    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

fn status_string(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return code.to_string();
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("-{signal}");
        }
    }
    "-1".to_string()
}
