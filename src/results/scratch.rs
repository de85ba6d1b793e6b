// src/results/scratch.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tempfile::TempDir;
use tracing::debug;

use crate::errors::Result;

/// Private temporary directory for one task, created on first use.
#[derive(Debug, Default)]
pub struct ScratchArea {
    dir: Option<TempDir>,
}

impl ScratchArea {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root of the scratch area, creating it if needed.
    pub fn root(&mut self) -> Result<&Path> {
        let dir = match self.dir.take() {
            Some(dir) => dir,
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("fleetrun-")
                    .tempdir()
                    .context("creating task scratch directory")?;
                debug!(path = %dir.path().display(), "created scratch area");
                dir
            }
        };
        Ok(self.dir.insert(dir).path())
    }

    pub fn file(&mut self, name: &str) -> Result<PathBuf> {
        Ok(self.root()?.join(name))
    }

    /// Subdirectory of the scratch area, created if needed.
    pub fn subdir(&mut self, name: &str) -> Result<PathBuf> {
        let path = self.root()?.join(name);
        fs::create_dir_all(&path)
            .with_context(|| format!("creating scratch subdir {:?}", path))?;
        Ok(path)
    }

    /// `root/name` if the scratch area exists and the entry is present.
    pub fn existing(&self, name: &str) -> Option<PathBuf> {
        let path = self.dir.as_ref()?.path().join(name);
        path.exists().then_some(path)
    }

    pub fn is_created(&self) -> bool {
        self.dir.is_some()
    }

    /// Delete the scratch area. Calling it again is a no-op.
    pub fn release(&mut self) -> Result<()> {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            dir.close()
                .with_context(|| format!("removing scratch area {:?}", path))?;
            debug!(path = %path.display(), "released scratch area");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_lazily_and_released_once() {
        let mut scratch = ScratchArea::new();
        assert!(!scratch.is_created());
        assert!(scratch.existing("stdout").is_none());

        let root = scratch.root().unwrap().to_path_buf();
        assert!(root.is_dir());

        let results = scratch.subdir("results").unwrap();
        assert!(results.is_dir());
        assert_eq!(scratch.existing("results"), Some(results));

        scratch.release().unwrap();
        assert!(!root.exists());
        scratch.release().unwrap();
    }
}
