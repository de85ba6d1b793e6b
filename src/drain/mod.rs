// src/drain/mod.rs

//! Fan-out of a run's tasks onto the pool and first-completed fan-in.
//!
//! Namespace layout for a run `r` with tasks `a`, `b`:
//!
//! ```text
//! srun/r      -> Keys([srun/r/a, srun/r/b])   (run index, written once)
//! srun/r/a    -> Future(handle)               (removed once collected)
//! srun/r/b    -> Future(handle)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::errors::{FleetError, Result};
use crate::pool::{
    NamespaceKey, NamespaceValue, Resolution, SubmissionKey, TaskHandle, WaitAny, WorkerPool,
    job, wait_any,
};
use crate::process::supervisor;
use crate::results::Results;
use crate::tasks::{TaskCommand, TaskSpec};

/// Length of the command digest embedded in submission keys.
const DIGEST_LEN: usize = 16;

/// `{run}/{task}/{digest}` where the digest covers the command and shell
/// flag, so an edited command never reuses a live submission.
pub fn submission_key(run: &str, task: &TaskSpec) -> SubmissionKey {
    let mut hasher = blake3::Hasher::new();
    match &task.command {
        TaskCommand::Line(line) => {
            hasher.update(b"line\0");
            hasher.update(line.as_bytes());
        }
        TaskCommand::Argv(argv) => {
            hasher.update(b"argv");
            for arg in argv {
                hasher.update(b"\0");
                hasher.update(arg.as_bytes());
            }
        }
    }
    let mode: &[u8] = if task.shell { b"\0shell" } else { b"\0exec" };
    hasher.update(mode);

    let hex = hasher.finalize().to_hex();
    SubmissionKey::new(format!("{run}/{}/{}", task.name, &hex.as_str()[..DIGEST_LEN]))
}

/// Submit every task of `run_name` to the pool and publish the run index.
///
/// A task whose namespace entry still holds an unresolved future is not
/// submitted again; it stays in the index and will be drained with the
/// existing future.
///
/// Returns the task keys in submission order.
pub fn submit(
    pool: &dyn WorkerPool,
    tasks: &[TaskSpec],
    results: Arc<dyn Results>,
    run_name: &str,
    poll_interval: Duration,
) -> Result<Vec<NamespaceKey>> {
    let ns = pool.namespace();
    let mut keys = Vec::with_capacity(tasks.len());

    for task in tasks {
        let task_key = NamespaceKey::task(run_name, &task.name);
        keys.push(task_key.clone());

        if let Some(NamespaceValue::Future(existing)) = ns.fetch(&task_key)
            && !existing.is_resolved()
        {
            warn!(key = %task_key, "task still pending from an earlier submission; not resubmitting");
            continue;
        }

        let key = submission_key(run_name, task);
        let spec = task.clone();
        let results = results.clone();
        let handle = pool.submit(
            key.clone(),
            job(move |env| async move {
                debug!(task = %spec.name, worker = env.id(), "creating result context");
                let mut ctx = results.create_context(&spec.name)?;
                let status =
                    supervisor::execute(ctx.as_mut(), &spec.command, spec.shell, poll_interval)
                        .await?;
                Ok(status)
            }),
        )?;

        debug!(key = %task_key, submission = %key, "submitted");
        ns.publish(task_key, NamespaceValue::Future(handle));
    }

    ns.publish(
        NamespaceKey::run_index(run_name),
        NamespaceValue::Keys(keys.clone()),
    );
    info!(run = %run_name, tasks = keys.len(), "run submitted");
    Ok(keys)
}

/// A task that completed with exit status `0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task: String,
    pub status: String,
}

/// What one `collect` observed.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub run: String,
    /// In completion order.
    pub succeeded: Vec<TaskOutcome>,
    /// `FleetError::TaskFailed` entries, in completion order.
    pub failed: Vec<FleetError>,
    /// Index entries with no bound future.
    pub skipped: Vec<String>,
}

impl DrainReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn collected(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Names of the failed tasks.
    pub fn failed_tasks(&self) -> Vec<&str> {
        self.failed
            .iter()
            .filter_map(|e| match e {
                FleetError::TaskFailed { key, .. } => key.rsplit('/').next(),
                _ => None,
            })
            .collect()
    }
}

struct Pending {
    key: NamespaceKey,
    task: String,
}

/// Drain every future registered for `run_name`, first completion first.
///
/// Each resolved future's entry is removed from the namespace whether it
/// succeeded or failed. A task failure never aborts the drain. The run index
/// stays in place; collecting again finds nothing bound and returns an empty
/// report.
pub async fn collect(pool: &dyn WorkerPool, run_name: &str) -> Result<DrainReport> {
    let ns = pool.namespace();
    let index_key = NamespaceKey::run_index(run_name);

    let index = match ns.fetch(&index_key) {
        Some(NamespaceValue::Keys(keys)) => keys,
        Some(_) => {
            return Err(FleetError::Other(anyhow::anyhow!(
                "{index_key} does not hold a run index"
            )));
        }
        None => return Err(FleetError::UnknownRun(run_name.to_string())),
    };

    let mut report = DrainReport {
        run: run_name.to_string(),
        ..Default::default()
    };
    let mut by_submission: HashMap<String, Pending> = HashMap::new();
    let mut queue: Vec<TaskHandle> = Vec::new();

    for key in index {
        let task = key.as_str().rsplit('/').next().unwrap_or_default().to_string();
        match ns.fetch(&key) {
            Some(NamespaceValue::Future(handle)) => {
                by_submission.insert(handle.key().to_string(), Pending { key, task });
                queue.push(handle);
            }
            _ => {
                debug!(key = %key, "no future bound; skipping");
                report.skipped.push(task);
            }
        }
    }

    info!(run = %run_name, outstanding = queue.len(), "draining");

    while !queue.is_empty() {
        let WaitAny { resolved, pending } = wait_any(queue).await;

        for handle in resolved {
            let Some(Pending { key, task }) = by_submission.remove(handle.key()) else {
                continue;
            };
            let resolution = handle
                .resolution()
                .unwrap_or_else(|| Resolution::Failed("unresolved".into()));

            match resolution {
                Resolution::Finished(status) if status == "0" => {
                    info!(key = %key, status = %status, "task succeeded");
                    report.succeeded.push(TaskOutcome { task, status });
                }
                Resolution::Finished(status) => {
                    warn!(key = %key, status = %status, "task exited non-zero");
                    report.failed.push(FleetError::TaskFailed {
                        key: format!("{run_name}/{task}"),
                        reason: format!("exited with status {status}"),
                    });
                }
                Resolution::Failed(reason) => {
                    error!(key = %key, reason = %reason, "task raised");
                    report.failed.push(FleetError::TaskFailed {
                        key: format!("{run_name}/{task}"),
                        reason,
                    });
                }
            }

            let removed = ns.unpublish_if(&key, |value| {
                matches!(value, NamespaceValue::Future(bound) if bound.same_as(&handle))
            });
            if !removed {
                debug!(key = %key, "entry already replaced or removed");
            }
        }

        queue = pending;
    }

    info!(
        run = %run_name,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "drain complete"
    );
    Ok(report)
}

/// Remove every namespace key under `srun/{prefix}`.
///
/// Pending futures lose their entries; their jobs are not cancelled and keep
/// running on the workers.
pub fn cleanup_namespace(pool: &dyn WorkerPool, prefix: &str) -> usize {
    let ns = pool.namespace();
    let keys = ns.list_keys(&NamespaceKey::run_prefix(prefix));

    let mut removed = 0;
    for key in keys {
        if ns.unpublish(&key) {
            removed += 1;
        } else {
            debug!(key = %key, "already gone");
        }
    }

    info!(prefix = %prefix, removed, "namespace cleaned");
    removed
}
