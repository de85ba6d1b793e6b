// src/pool/namespace.rs

//! Shared key-value space used to hand off future handles, run indexes and
//! broadcast payloads between the controller and workers.
//!
//! Key shapes are fixed by [`NamespaceKey`]:
//!
//! - `srun/{run}`: ordered list of the run's task keys
//! - `srun/{run}/{task}`: the task's future handle
//! - `files/{path}`: broadcast payload (directories end in `/`)

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::pool::handle::TaskHandle;

pub const RUN_PREFIX: &str = "srun/";
pub const FILE_PREFIX: &str = "files/";

/// A namespace key with a known shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceKey(String);

impl NamespaceKey {
    pub fn run_index(run: &str) -> Self {
        Self(format!("{RUN_PREFIX}{run}"))
    }

    pub fn task(run: &str, task: &str) -> Self {
        Self(format!("{RUN_PREFIX}{run}/{task}"))
    }

    pub fn file(path: &str) -> Self {
        Self(format!("{FILE_PREFIX}{path}"))
    }

    /// Prefix matching every key of runs whose name starts with `prefix`.
    pub fn run_prefix(prefix: &str) -> String {
        format!("{RUN_PREFIX}{prefix}")
    }

    /// Rebuild a key from its rendered form, if it has a known shape.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.strip_prefix(RUN_PREFIX).is_some_and(|rest| !rest.is_empty())
            || raw.strip_prefix(FILE_PREFIX).is_some_and(|rest| !rest.is_empty())
        {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    /// Path of a `files/` key.
    pub fn file_path(&self) -> Option<&str> {
        self.0.strip_prefix(FILE_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NamespaceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Values the namespace can hold.
#[derive(Debug, Clone)]
pub enum NamespaceValue {
    Future(TaskHandle),
    Bytes(Arc<Vec<u8>>),
    Keys(Vec<NamespaceKey>),
}

/// Concurrent key-value store shared by every participant of a pool.
#[derive(Debug, Default)]
pub struct Namespace {
    entries: RwLock<BTreeMap<NamespaceKey, NamespaceValue>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<NamespaceKey, NamespaceValue>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<NamespaceKey, NamespaceValue>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `value` under `key`, returning what was there before.
    pub fn publish(&self, key: NamespaceKey, value: NamespaceValue) -> Option<NamespaceValue> {
        self.write().insert(key, value)
    }

    pub fn fetch(&self, key: &NamespaceKey) -> Option<NamespaceValue> {
        self.read().get(key).cloned()
    }

    /// Remove `key`. Removing an absent key is not an error; the return value
    /// says whether anything was removed.
    pub fn unpublish(&self, key: &NamespaceKey) -> bool {
        self.write().remove(key).is_some()
    }

    /// Remove `key` only if its current value satisfies `pred`.
    pub fn unpublish_if(&self, key: &NamespaceKey, pred: impl FnOnce(&NamespaceValue) -> bool) -> bool {
        let mut entries = self.write();
        match entries.get(key) {
            Some(value) if pred(value) => entries.remove(key).is_some(),
            _ => false,
        }
    }

    /// All keys whose rendered form starts with `prefix`, in key order.
    pub fn list_keys(&self, prefix: &str) -> Vec<NamespaceKey> {
        self.read()
            .keys()
            .filter(|k| k.as_str().starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
