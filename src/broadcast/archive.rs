// src/broadcast/archive.rs

//! Packing and unpacking broadcast payloads with the system `tar`.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, bail};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Gzip tarball of the contents of `dir`, without version-control metadata.
pub async fn archive_dir(dir: &Path) -> anyhow::Result<Vec<u8>> {
    let output = Command::new("tar")
        .arg("--exclude=.git")
        .arg("-czf")
        .arg("-")
        .arg("-C")
        .arg(dir)
        .arg(".")
        .stdin(Stdio::null())
        .output()
        .await
        .context("running tar")?;

    if !output.status.success() {
        bail!(
            "tar failed for {:?} ({}): {}",
            dir,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    debug!(dir = ?dir, bytes = output.stdout.len(), "archived directory");
    Ok(output.stdout)
}

/// Unpack a payload produced by [`archive_dir`] into `dir`, creating it.
pub async fn unpack_dir(payload: &[u8], dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {:?}", dir))?;

    let mut child = Command::new("tar")
        .arg("-xzf")
        .arg("-")
        .arg("-C")
        .arg(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("spawning tar")?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(payload)
            .await
            .context("streaming payload to tar")?;
    }

    let output = child.wait_with_output().await.context("waiting for tar")?;
    if !output.status.success() {
        bail!(
            "unpacking into {:?} failed ({}): {}",
            dir,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Write a raw file payload, creating parent directories.
pub async fn write_file(payload: &[u8], path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {:?}", parent))?;
    }
    tokio::fs::write(path, payload)
        .await
        .with_context(|| format!("writing {:?}", path))
}
