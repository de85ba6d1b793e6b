// src/broadcast/mod.rs

//! Pushing local files and directories to every current and future worker.
//!
//! A broadcast publishes the payload under `files/{abs path}` (directories
//! end in `/` and carry a gzip tarball) and materializes it on every worker.
//! The `register_files` join hook materializes every published payload on
//! workers that join later.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::config::FileSync;
use crate::config::validate::validate_file_syncs;
use crate::errors::Result;
use crate::pool::namespace::FILE_PREFIX;
use crate::pool::{NamespaceKey, NamespaceValue, WorkerEnv, WorkerPool, hook};

pub mod archive;

/// Name of the join hook that replays published payloads on new workers.
pub const JOIN_HOOK: &str = "register_files";

/// Broadcasts files to the workers of one pool.
pub struct FileBroadcast<'a> {
    pool: &'a dyn WorkerPool,
}

impl<'a> FileBroadcast<'a> {
    pub fn new(pool: &'a dyn WorkerPool) -> Self {
        Self { pool }
    }

    /// Publish each path and materialize it on every worker.
    ///
    /// All pairs are checked before anything is published; a pair whose
    /// source and destination differ fails the whole call.
    pub async fn broadcast(&self, syncs: &[FileSync]) -> Result<()> {
        validate_file_syncs(syncs)?;
        if syncs.is_empty() {
            return Ok(());
        }

        if self.pool.register_join_hook(JOIN_HOOK, hook(materialize_all)) {
            debug!(hook = JOIN_HOOK, "join hook registered");
        }

        for sync in syncs {
            self.broadcast_one(&sync.src).await?;
        }
        Ok(())
    }

    async fn broadcast_one(&self, path: &Path) -> Result<()> {
        let path = std::path::absolute(path)
            .with_context(|| format!("resolving {:?}", path))?;
        let meta = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("reading {:?}", path))?;

        let (published, payload) = if meta.is_dir() {
            let bytes = archive::archive_dir(&path).await?;
            (format!("{}/", path.display()), bytes)
        } else {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {:?}", path))?;
            (path.display().to_string(), bytes)
        };

        let ns = self.pool.namespace();
        for stale in published_paths(self.pool) {
            if replaces(&published, &stale) && ns.unpublish(&NamespaceKey::file(&stale)) {
                debug!(path = %stale, "replaced earlier payload");
            }
        }

        let size = payload.len();
        ns.publish(
            NamespaceKey::file(&published),
            NamespaceValue::Bytes(Arc::new(payload)),
        );

        let target = published.clone();
        self.pool
            .run_on_workers(hook(move |env| {
                let target = target.clone();
                async move { materialize(&env, &target).await }
            }))
            .await?;

        info!(path = %published, bytes = size, workers = self.pool.workers().len(), "broadcast");
        Ok(())
    }
}

/// Paths with a published payload. Directory paths end in `/`.
pub fn published_paths(pool: &dyn WorkerPool) -> Vec<String> {
    pool.namespace()
        .list_keys(FILE_PREFIX)
        .iter()
        .filter_map(|k| k.file_path().map(str::to_string))
        .collect()
}

/// Forget every published payload. Workers that join afterwards receive
/// nothing; files already materialized stay where they are.
pub fn clear_files(pool: &dyn WorkerPool) -> usize {
    let ns = pool.namespace();
    let removed = ns
        .list_keys(FILE_PREFIX)
        .iter()
        .filter(|k| ns.unpublish(k))
        .count();
    info!(removed, "cleared published files");
    removed
}

/// Whether publishing `new` supersedes the existing payload at `existing`:
/// the same path, or anything beneath it.
fn replaces(new: &str, existing: &str) -> bool {
    let base = new.trim_end_matches('/');
    existing.trim_end_matches('/') == base || existing.starts_with(&format!("{base}/"))
}

/// Materialize one published path on the worker behind `env`.
pub async fn materialize(env: &WorkerEnv, published: &str) -> anyhow::Result<()> {
    let key = NamespaceKey::file(published);
    let payload = match env.namespace().fetch(&key) {
        Some(NamespaceValue::Bytes(bytes)) => bytes,
        Some(_) => anyhow::bail!("{key} does not hold a file payload"),
        None => anyhow::bail!("{key} is not published"),
    };

    let target = env.localize(&PathBuf::from(published));
    if published.ends_with('/') {
        archive::unpack_dir(&payload, &target).await?;
    } else {
        archive::write_file(&payload, &target).await?;
    }
    debug!(worker = env.id(), path = ?target, "materialized");
    Ok(())
}

/// Join hook body: materialize every published payload.
async fn materialize_all(env: WorkerEnv) -> anyhow::Result<()> {
    let paths: Vec<String> = env
        .namespace()
        .list_keys(FILE_PREFIX)
        .iter()
        .filter_map(|k| k.file_path().map(str::to_string))
        .collect();

    let mut failures = Vec::new();
    for path in &paths {
        if let Err(e) = materialize(&env, path).await {
            warn!(worker = env.id(), path = %path, error = %format!("{e:#}"), "materialize failed");
            failures.push(path.as_str());
        }
    }

    if !failures.is_empty() {
        anyhow::bail!("could not materialize {}", failures.join(", "));
    }
    info!(worker = env.id(), files = paths.len(), "registered files");
    Ok(())
}
