// src/pool/mod.rs

//! Worker-pool runtime contract.
//!
//! The drain and broadcast code only talk to a [`WorkerPool`]:
//!
//! - `submit` places a job on some worker and hands back a [`TaskHandle`];
//! - `namespace` is the shared key-value space every participant sees;
//! - `run_on_workers` / `register_join_hook` run code on every current and
//!   future worker.
//!
//! [`LocalPool`] is the in-process implementation (`kind = "local"`).

use std::fmt::{self, Debug};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use crate::config::BackendSection;
use crate::errors::{FleetError, Result};

pub mod handle;
pub mod local;
pub mod namespace;

pub use handle::{Resolution, Resolver, TaskHandle, WaitAny, wait_any};
pub use local::{LocalPool, LocalPoolOptions};
pub use namespace::{Namespace, NamespaceKey, NamespaceValue};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unit of work, run once on whichever worker it is placed on.
/// `Ok(status)` resolves the handle as finished, `Err` as failed.
pub type Job = Box<dyn FnOnce(WorkerEnv) -> BoxFuture<'static, anyhow::Result<String>> + Send>;

/// Code run on every worker (now, or when it joins).
pub type WorkerHook = Arc<dyn Fn(WorkerEnv) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`Job`].
pub fn job<F, Fut>(f: F) -> Job
where
    F: FnOnce(WorkerEnv) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    Box::new(move |env| Box::pin(f(env)))
}

/// Wrap an async closure as a [`WorkerHook`].
pub fn hook<F, Fut>(f: F) -> WorkerHook
where
    F: Fn(WorkerEnv) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |env| Box::pin(f(env)))
}

/// Identifies one submission. Submitting a key that is still live returns
/// the existing handle instead of running the job again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubmissionKey(String);

impl SubmissionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a job or hook sees of the worker it runs on.
#[derive(Clone)]
pub struct WorkerEnv {
    id: usize,
    root: Option<PathBuf>,
    namespace: Arc<Namespace>,
}

impl WorkerEnv {
    pub fn new(id: usize, root: Option<PathBuf>, namespace: Arc<Namespace>) -> Self {
        Self {
            id,
            root,
            namespace,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Map an absolute path onto this worker's filesystem.
    ///
    /// Workers without a root share the controller's filesystem, so the path
    /// is returned as is.
    pub fn localize(&self, path: &Path) -> PathBuf {
        match &self.root {
            None => path.to_path_buf(),
            Some(root) => {
                let relative: PathBuf = path
                    .components()
                    .filter(|c| matches!(c, Component::Normal(_)))
                    .collect();
                root.join(relative)
            }
        }
    }
}

impl Debug for WorkerEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerEnv")
            .field("id", &self.id)
            .field("root", &self.root)
            .finish()
    }
}

/// A pool of workers plus the namespace they share.
pub trait WorkerPool: Send + Sync + Debug {
    /// Selector name this pool was registered under.
    fn kind(&self) -> &'static str;

    /// Place `job` on a worker. Must be called from within the tokio runtime.
    fn submit(&self, key: SubmissionKey, job: Job) -> Result<TaskHandle>;

    fn namespace(&self) -> &Namespace;

    /// Snapshot of the current workers.
    fn workers(&self) -> Vec<WorkerEnv>;

    /// Run `hook` once on every current worker; fails if any worker failed.
    fn run_on_workers(&self, hook: WorkerHook) -> BoxFuture<'_, Result<()>>;

    /// Register `hook` to run on every worker that joins later. Returns
    /// `false` if a hook of that name was already registered.
    fn register_join_hook(&self, name: &str, hook: WorkerHook) -> bool;

    /// Register `hook` for future workers, then run it on the current ones.
    fn broadcast_run(&self, name: &str, hook: WorkerHook) -> BoxFuture<'_, Result<()>> {
        self.register_join_hook(name, hook.clone());
        self.run_on_workers(hook)
    }

    /// Worker teardown: sweep running task processes, then abort in-flight
    /// jobs.
    fn shutdown(&self) -> BoxFuture<'_, ()>;
}

type PoolFactory = fn(&toml::Table) -> Result<Arc<dyn WorkerPool>>;

/// Registered pools, keyed by selector name.
const POOLS: &[(&str, PoolFactory)] = &[("local", local::from_params)];

/// Construct the worker pool named by `section.kind`.
pub fn create(section: &BackendSection) -> Result<Arc<dyn WorkerPool>> {
    let factory = POOLS
        .iter()
        .find(|(name, _)| *name == section.kind)
        .map(|(_, f)| *f)
        .ok_or_else(|| {
            FleetError::config(format!(
                "unknown executor '{}' (available: {})",
                section.kind,
                available().collect::<Vec<_>>().join(", ")
            ))
        })?;
    factory(&section.params)
}

pub fn available() -> impl Iterator<Item = &'static str> {
    POOLS.iter().map(|(name, _)| *name)
}
