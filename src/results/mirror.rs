// src/results/mirror.rs

//! Staged results backend.
//!
//! The task writes into a private scratch area; `sync` and `finish` copy what
//! is there to `<target>/<task>/`. This is how an object-store backend
//! behaves (upload on sync, upload the artifact tree on finish) with a
//! directory standing in for the bucket.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::decode_params;
use crate::errors::Result;
use crate::results::{ResultContext, Results, ScratchArea, substitute_name};

#[derive(Debug, Deserialize)]
struct MirrorParams {
    target: String,
}

pub(super) fn from_params(table: &toml::Table, run_name: &str) -> Result<Arc<dyn Results>> {
    let p: MirrorParams = decode_params(table)?;
    Ok(Arc::new(MirrorResults::new(&p.target, run_name)))
}

#[derive(Debug, Clone)]
pub struct MirrorResults {
    target: PathBuf,
}

impl MirrorResults {
    /// `target` may contain `{name}`, replaced by the run name.
    pub fn new(target: &str, run_name: &str) -> Self {
        Self {
            target: PathBuf::from(substitute_name(target, run_name)),
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    fn task_target(&self, task: &str) -> PathBuf {
        self.target.join(task)
    }
}

impl Results for MirrorResults {
    fn kind(&self) -> &'static str {
        "mirror"
    }

    fn create_context(&self, task: &str) -> Result<Box<dyn ResultContext>> {
        Ok(Box::new(MirrorContext {
            task: task.to_string(),
            results: self.clone(),
            scratch: ScratchArea::new(),
        }))
    }
}

#[derive(Debug)]
pub struct MirrorContext {
    task: String,
    results: MirrorResults,
    scratch: ScratchArea,
}

impl MirrorContext {
    fn upload(&self, src: &Path, rel: &Path) -> Result<()> {
        let dest = self.results.task_target(&self.task).join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
        }
        fs::copy(src, &dest).with_context(|| format!("copying {:?} to {:?}", src, dest))?;
        Ok(())
    }

    fn sync_streams(&self) -> Result<()> {
        for name in ["stdout", "stderr"] {
            if let Some(path) = self.scratch.existing(name) {
                self.upload(&path, Path::new(name))?;
            }
        }
        Ok(())
    }
}

impl ResultContext for MirrorContext {
    fn task_name(&self) -> &str {
        &self.task
    }

    fn stdout_path(&mut self) -> Result<PathBuf> {
        self.scratch.file("stdout")
    }

    fn stderr_path(&mut self) -> Result<PathBuf> {
        self.scratch.file("stderr")
    }

    fn results_dir(&mut self) -> Result<PathBuf> {
        self.scratch.subdir("results")
    }

    fn sync(&mut self) -> Result<()> {
        debug!(task = %self.task, "syncing stdout/stderr");
        self.sync_streams()
    }

    fn set_status(&mut self, status: &str) -> Result<()> {
        let dir = self.results.task_target(&self.task);
        fs::create_dir_all(&dir).with_context(|| format!("creating {:?}", dir))?;
        fs::write(dir.join("status"), status)
            .with_context(|| format!("writing status for task '{}'", self.task))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.sync_streams()?;

        let Some(results_dir) = self.scratch.existing("results") else {
            warn!(task = %self.task, "results dir does not exist; nothing to save");
            return Ok(());
        };

        info!(task = %self.task, dir = %results_dir.display(), "saving results");
        for file in walk_files(&results_dir)? {
            let rel = file
                .strip_prefix(&results_dir)
                .context("artifact outside results dir")?;
            self.upload(&file, &Path::new("results").join(rel))?;
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        self.scratch.release()
    }
}

/// All regular files below `root`, recursively.
fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).with_context(|| format!("reading dir {:?}", dir))? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(root: &Path) -> MirrorResults {
        MirrorResults::new(&format!("{}/{{name}}", root.display()), "r1")
    }

    #[test]
    fn sync_skips_streams_that_do_not_exist_yet() {
        let root = tempfile::tempdir().unwrap();
        let results = backend(root.path());
        let mut ctx = results.create_context("my-task").unwrap();

        ctx.sync().unwrap();
        assert!(!root.path().join("r1/my-task/stdout").exists());

        fs::write(ctx.stdout_path().unwrap(), "hi").unwrap();
        fs::write(ctx.stderr_path().unwrap(), "hihi").unwrap();
        ctx.sync().unwrap();

        let task = root.path().join("r1/my-task");
        assert_eq!(fs::read_to_string(task.join("stdout")).unwrap(), "hi");
        assert_eq!(fs::read_to_string(task.join("stderr")).unwrap(), "hihi");
        ctx.cleanup().unwrap();
    }

    #[test]
    fn finish_uploads_the_results_tree() {
        let root = tempfile::tempdir().unwrap();
        let results = backend(root.path());
        let mut ctx = results.create_context("my-task").unwrap();

        let dir = ctx.results_dir().unwrap();
        fs::create_dir_all(dir.join("foo/bar")).unwrap();
        fs::write(dir.join("test_a"), "a").unwrap();
        fs::write(dir.join("foo/test_b"), "b").unwrap();
        fs::write(dir.join("foo/bar/test_c"), "c").unwrap();

        ctx.set_status("2").unwrap();
        ctx.finish().unwrap();

        let task = root.path().join("r1/my-task");
        assert_eq!(fs::read_to_string(task.join("status")).unwrap(), "2");
        assert_eq!(fs::read_to_string(task.join("results/test_a")).unwrap(), "a");
        assert_eq!(fs::read_to_string(task.join("results/foo/test_b")).unwrap(), "b");
        assert_eq!(
            fs::read_to_string(task.join("results/foo/bar/test_c")).unwrap(),
            "c"
        );

        let scratch_dir = dir.parent().unwrap().to_path_buf();
        ctx.cleanup().unwrap();
        assert!(!scratch_dir.exists());
        // Uploaded copies outlive the scratch area.
        assert!(task.join("results/test_a").exists());
    }

    #[test]
    fn finish_without_results_dir_is_not_an_error() {
        let root = tempfile::tempdir().unwrap();
        let mut ctx = backend(root.path()).create_context("t").unwrap();
        ctx.finish().unwrap();
        ctx.cleanup().unwrap();
    }
}
