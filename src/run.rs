// src/run.rs

//! One run end to end: identity, backends, broadcast, submit, drain.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};

use crate::broadcast::FileBroadcast;
use crate::config::RunFile;
use crate::drain::{self, DrainReport};
use crate::errors::{FleetError, Result};
use crate::pool::{self, WorkerPool};
use crate::results::{self, Results};

/// The resolved name of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub name: String,
    /// Set when the name was derived from a prefix.
    pub prefix: Option<String>,
}

fn present(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

impl RunIdentity {
    /// Resolve a name from an explicit name or a prefix, stamping prefixes
    /// with the current UTC time.
    pub fn resolve(name: Option<&str>, prefix: Option<&str>) -> Result<Self> {
        Self::resolve_at(name, prefix, Utc::now())
    }

    pub fn resolve_at(
        name: Option<&str>,
        prefix: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        match (present(name), present(prefix)) {
            (Some(_), Some(_)) => Err(FleetError::config(
                "name and prefix are mutually exclusive",
            )),
            (Some(name), None) => Ok(Self {
                name: name.to_string(),
                prefix: None,
            }),
            (None, Some(prefix)) => Ok(Self {
                name: format!(
                    "{prefix}-{}",
                    now.to_rfc3339_opts(SecondsFormat::Micros, true)
                ),
                prefix: Some(prefix.to_string()),
            }),
            (None, None) => Err(FleetError::config("name or prefix must be set")),
        }
    }

    /// Identity for `run`, with command-line values replacing the file's
    /// name/prefix pair when either is given.
    pub fn for_run(
        run: &RunFile,
        cli_name: Option<&str>,
        cli_prefix: Option<&str>,
    ) -> Result<Self> {
        if present(cli_name).is_some() || present(cli_prefix).is_some() {
            Self::resolve(cli_name, cli_prefix)
        } else {
            Self::resolve(run.name.as_deref(), run.prefix.as_deref())
        }
    }
}

/// Composes broadcast, submission and drain for one run.
#[derive(Debug)]
pub struct RunCoordinator {
    run: RunFile,
    identity: RunIdentity,
    results: Arc<dyn Results>,
    pool: Arc<dyn WorkerPool>,
}

impl RunCoordinator {
    /// Build both backends from the run file's selectors.
    pub fn new(run: RunFile, identity: RunIdentity) -> Result<Self> {
        let results = results::create(&run.results, &identity.name)?;
        let pool = pool::create(&run.executor)?;
        Ok(Self::with_backends(run, identity, results, pool))
    }

    pub fn with_backends(
        run: RunFile,
        identity: RunIdentity,
        results: Arc<dyn Results>,
        pool: Arc<dyn WorkerPool>,
    ) -> Self {
        Self {
            run,
            identity,
            results,
            pool,
        }
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub fn pool(&self) -> &Arc<dyn WorkerPool> {
        &self.pool
    }

    /// Run every task and drain the results.
    ///
    /// With `clean`, namespace entries left under this run's name are
    /// removed first. Task failures are in the report, not the error.
    pub async fn execute(&self, clean: bool) -> Result<DrainReport> {
        let name = self.name();
        let pool = self.pool.as_ref();

        if clean {
            drain::cleanup_namespace(pool, name);
        }

        info!(
            run = %name,
            results = self.results.kind(),
            executor = pool.kind(),
            tasks = self.run.tasks.len(),
            "starting run"
        );

        FileBroadcast::new(pool).broadcast(&self.run.file_syncs).await?;
        drain::submit(
            pool,
            &self.run.tasks,
            self.results.clone(),
            name,
            self.run.poll_interval,
        )?;
        let report = drain::collect(pool, name).await?;

        if report.is_success() {
            info!(run = %name, tasks = report.collected(), "run complete");
        } else {
            for failure in &report.failed {
                warn!(run = %name, "{failure}");
            }
            warn!(
                run = %name,
                failed = report.failed.len(),
                succeeded = report.succeeded.len(),
                "run complete with failures"
            );
        }
        Ok(report)
    }

    /// Tear down the pool's workers.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
