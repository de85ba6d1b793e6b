// src/results/local.rs

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tracing::debug;

use crate::config::decode_params;
use crate::errors::Result;
use crate::results::{ResultContext, Results, substitute_name};

#[derive(Debug, Deserialize)]
struct LocalParams {
    path: String,
}

pub(super) fn from_params(table: &toml::Table, run_name: &str) -> Result<Arc<dyn Results>> {
    let p: LocalParams = decode_params(table)?;
    Ok(Arc::new(LocalResults::new(&p.path, run_name)?))
}

/// Results written directly to a directory on the worker's filesystem.
#[derive(Debug, Clone)]
pub struct LocalResults {
    path: PathBuf,
}

impl LocalResults {
    /// `path` may contain `{name}`, replaced by the run name.
    pub fn new(path: &str, run_name: &str) -> Result<Self> {
        let path = PathBuf::from(substitute_name(path, run_name));
        fs::create_dir_all(&path)
            .with_context(|| format!("creating results directory {:?}", path))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Results for LocalResults {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn create_context(&self, task: &str) -> Result<Box<dyn ResultContext>> {
        let dir = self.path.join(task);
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating task results directory {:?}", dir))?;
        Ok(Box::new(LocalContext {
            task: task.to_string(),
            dir,
            results: self.clone(),
        }))
    }
}

/// Context whose "scratch area" is the task's final directory.
#[derive(Debug)]
pub struct LocalContext {
    task: String,
    dir: PathBuf,
    results: LocalResults,
}

impl LocalContext {
    /// Backend this context writes through.
    pub fn results(&self) -> &LocalResults {
        &self.results
    }
}

impl ResultContext for LocalContext {
    fn task_name(&self) -> &str {
        &self.task
    }

    fn stdout_path(&mut self) -> Result<PathBuf> {
        Ok(self.dir.join("stdout"))
    }

    fn stderr_path(&mut self) -> Result<PathBuf> {
        Ok(self.dir.join("stderr"))
    }

    fn results_dir(&mut self) -> Result<PathBuf> {
        let dir = self.dir.join("results");
        fs::create_dir_all(&dir).with_context(|| format!("creating {:?}", dir))?;
        Ok(dir)
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_status(&mut self, status: &str) -> Result<()> {
        let path = self.dir.join("status");
        fs::write(&path, status).with_context(|| format!("writing status to {:?}", path))?;
        debug!(task = %self.task, status, "status recorded");
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}
