// src/pool/local.rs

//! In-process worker pool on the tokio runtime.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::config::decode_params;
use crate::errors::{FleetError, Result};
use crate::pool::{
    BoxFuture, Job, Namespace, Resolution, SubmissionKey, TaskHandle, WorkerEnv, WorkerHook,
    WorkerPool,
};
use crate::process::reaper;

#[derive(Debug, Deserialize)]
struct LocalParams {
    #[serde(default)]
    workers: Option<usize>,
    #[serde(default)]
    threads_per_worker: Option<usize>,
    #[serde(default)]
    worker_roots: Vec<PathBuf>,
}

pub(super) fn from_params(table: &toml::Table) -> Result<Arc<dyn WorkerPool>> {
    let p: LocalParams = decode_params(table)?;
    let workers = p.workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    let options = LocalPoolOptions {
        workers,
        threads_per_worker: p.threads_per_worker.unwrap_or(1),
        worker_roots: p.worker_roots,
    };
    Ok(Arc::new(LocalPool::new(options)?))
}

#[derive(Debug, Clone)]
pub struct LocalPoolOptions {
    pub workers: usize,
    /// Jobs a single worker runs at once.
    pub threads_per_worker: usize,
    /// Either empty (all workers share the controller's filesystem) or one
    /// root per worker.
    pub worker_roots: Vec<PathBuf>,
}

impl Default for LocalPoolOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            threads_per_worker: 1,
            worker_roots: Vec::new(),
        }
    }
}

struct Worker {
    env: WorkerEnv,
    slots: Arc<Semaphore>,
}

/// Pool of N in-process workers sharing one [`Namespace`].
///
/// - Jobs are placed round-robin.
/// - A submission key that is still live returns the existing handle.
/// - Workers added with [`LocalPool::add_worker`] run every join hook before
///   they are eligible for jobs.
pub struct LocalPool {
    namespace: Arc<Namespace>,
    workers: RwLock<Vec<Worker>>,
    threads_per_worker: usize,
    next_worker: AtomicUsize,
    next_id: AtomicUsize,
    live: Mutex<HashMap<SubmissionKey, TaskHandle>>,
    join_hooks: Mutex<Vec<(String, WorkerHook)>>,
    /// Held by a joining worker from its hook run until it is listed, and by
    /// `run_on_workers` while it takes its worker snapshot.
    membership: tokio::sync::Mutex<()>,
    jobs: Mutex<Vec<AbortHandle>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl LocalPool {
    pub fn new(options: LocalPoolOptions) -> Result<Self> {
        if options.workers == 0 {
            return Err(FleetError::PoolUnavailable(
                "local pool needs at least one worker".into(),
            ));
        }
        if options.threads_per_worker == 0 {
            return Err(FleetError::config("threads_per_worker must be at least 1"));
        }
        if !options.worker_roots.is_empty() && options.worker_roots.len() != options.workers {
            return Err(FleetError::config(format!(
                "worker_roots has {} entries but the pool has {} workers",
                options.worker_roots.len(),
                options.workers
            )));
        }

        let pool = Self {
            namespace: Arc::new(Namespace::new()),
            workers: RwLock::new(Vec::new()),
            threads_per_worker: options.threads_per_worker,
            next_worker: AtomicUsize::new(0),
            next_id: AtomicUsize::new(0),
            live: Mutex::new(HashMap::new()),
            join_hooks: Mutex::new(Vec::new()),
            membership: tokio::sync::Mutex::new(()),
            jobs: Mutex::new(Vec::new()),
        };

        let mut roots = options.worker_roots.into_iter();
        for _ in 0..options.workers {
            let env = pool.new_env(roots.next());
            pool.push_worker(env);
        }

        info!(
            workers = options.workers,
            threads_per_worker = options.threads_per_worker,
            "local pool started"
        );
        Ok(pool)
    }

    fn new_env(&self, root: Option<PathBuf>) -> WorkerEnv {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        WorkerEnv::new(id, root, self.namespace.clone())
    }

    fn push_worker(&self, env: WorkerEnv) {
        let worker = Worker {
            env,
            slots: Arc::new(Semaphore::new(self.threads_per_worker)),
        };
        self.workers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(worker);
    }

    /// Add a worker. Every registered join hook runs on it first; a failing
    /// hook is logged and the worker still joins.
    ///
    /// A `run_on_workers` call that starts while the hooks run waits and then
    /// includes this worker.
    pub async fn add_worker(&self, root: Option<PathBuf>) -> WorkerEnv {
        let _joining = self.membership.lock().await;
        let env = self.new_env(root);
        let hooks: Vec<(String, WorkerHook)> = lock(&self.join_hooks).clone();

        for (name, hook) in hooks {
            debug!(worker = env.id(), hook = %name, "running join hook");
            if let Err(e) = hook(env.clone()).await {
                error!(worker = env.id(), hook = %name, error = %format!("{e:#}"), "join hook failed");
            }
        }

        self.push_worker(env.clone());
        info!(worker = env.id(), "worker joined");
        env
    }

    /// Number of submissions whose handles are still pending.
    pub fn live_jobs(&self) -> usize {
        lock(&self.live)
            .values()
            .filter(|h| !h.is_resolved())
            .count()
    }

    fn pick_worker(&self) -> Result<(WorkerEnv, Arc<Semaphore>)> {
        let workers = self.workers.read().unwrap_or_else(|e| e.into_inner());
        if workers.is_empty() {
            return Err(FleetError::PoolUnavailable("pool has no workers".into()));
        }
        let idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % workers.len();
        let w = &workers[idx];
        Ok((w.env.clone(), w.slots.clone()))
    }
}

impl fmt::Debug for LocalPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPool")
            .field("workers", &self.workers().len())
            .field("threads_per_worker", &self.threads_per_worker)
            .finish()
    }
}

impl WorkerPool for LocalPool {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn submit(&self, key: SubmissionKey, job: Job) -> Result<TaskHandle> {
        let mut live = lock(&self.live);
        live.retain(|_, h| !h.is_resolved());

        if let Some(existing) = live.get(&key) {
            debug!(key = %key, "submission key still live; reusing handle");
            return Ok(existing.clone());
        }

        let (env, slots) = self.pick_worker()?;
        let (handle, resolver) = TaskHandle::pending(key.as_str());
        let worker = env.id();
        let job_key = key.clone();

        let join = tokio::spawn(async move {
            let _permit = match slots.acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    resolver.resolve(Resolution::Failed("worker closed".into()));
                    return;
                }
            };
            debug!(key = %job_key, worker, "job started");
            match job(env).await {
                Ok(status) => resolver.resolve(Resolution::Finished(status)),
                Err(e) => {
                    warn!(key = %job_key, worker, error = %format!("{e:#}"), "job failed");
                    resolver.resolve(Resolution::Failed(format!("{e:#}")));
                }
            }
        });

        let mut jobs = lock(&self.jobs);
        jobs.retain(|j| !j.is_finished());
        jobs.push(join.abort_handle());

        live.insert(key, handle.clone());
        Ok(handle)
    }

    fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn workers(&self) -> Vec<WorkerEnv> {
        self.workers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|w| w.env.clone())
            .collect()
    }

    fn run_on_workers(&self, hook: WorkerHook) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let envs = {
                let _joining = self.membership.lock().await;
                self.workers()
            };
            let runs = envs.into_iter().map(|env| {
                let hook = hook.clone();
                async move {
                    let id = env.id();
                    hook(env).await.map_err(|e| (id, e))
                }
            });

            let failures: Vec<String> = futures::future::join_all(runs)
                .await
                .into_iter()
                .filter_map(|r| r.err())
                .map(|(id, e)| format!("worker {id}: {e:#}"))
                .collect();

            if failures.is_empty() {
                Ok(())
            } else {
                Err(FleetError::Other(anyhow::anyhow!(
                    "worker hook failed on {} worker(s): {}",
                    failures.len(),
                    failures.join("; ")
                )))
            }
        })
    }

    fn register_join_hook(&self, name: &str, hook: WorkerHook) -> bool {
        let mut hooks = lock(&self.join_hooks);
        if hooks.iter().any(|(n, _)| n == name) {
            return false;
        }
        hooks.push((name.to_string(), hook));
        true
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            match tokio::task::spawn_blocking(reaper::cleanup_all).await {
                Ok(n) => info!(processes = n, "worker teardown swept running tasks"),
                Err(e) => warn!(error = %e, "process sweep did not complete"),
            }

            for job in lock(&self.jobs).drain(..) {
                job.abort();
            }
            lock(&self.live).clear();
            info!("local pool shut down");
        })
    }
}
