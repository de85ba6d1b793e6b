// src/pool/handle.rs

//! Future handles for submitted work and the wait-for-any primitive.

use std::fmt;

use tokio::sync::watch;

/// Final state of a submitted unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The job returned normally, with the task's recorded status.
    Finished(String),
    /// The job returned an error, panicked, or was dropped.
    Failed(String),
}

impl Resolution {
    pub fn is_finished(&self) -> bool {
        matches!(self, Resolution::Finished(_))
    }
}

/// Cloneable handle to the eventual [`Resolution`] of one submission.
#[derive(Clone)]
pub struct TaskHandle {
    key: String,
    rx: watch::Receiver<Option<Resolution>>,
}

impl TaskHandle {
    /// A pending handle plus the resolver that completes it.
    pub fn pending(key: impl Into<String>) -> (Self, Resolver) {
        let (tx, rx) = watch::channel(None);
        let handle = Self {
            key: key.into(),
            rx,
        };
        (handle, Resolver { tx: Some(tx) })
    }

    /// Submission key this handle was created for.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_resolved(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.rx.borrow().clone()
    }

    /// Wait until the handle resolves.
    pub async fn resolved(&self) -> Resolution {
        let mut rx = self.rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(value) => value
                .clone()
                .unwrap_or_else(|| Resolution::Failed("resolved without a value".into())),
            Err(_) => Resolution::Failed("task was dropped before it resolved".into()),
        }
    }

    /// True when both handles observe the same submission.
    pub fn same_as(&self, other: &TaskHandle) -> bool {
        self.rx.same_channel(&other.rx)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("key", &self.key)
            .field("resolution", &*self.rx.borrow())
            .finish()
    }
}

/// Completes a [`TaskHandle`]. Dropping it unresolved fails the handle, so
/// a lost job never leaves waiters hanging.
#[derive(Debug)]
pub struct Resolver {
    tx: Option<watch::Sender<Option<Resolution>>>,
}

impl Resolver {
    pub fn resolve(mut self, resolution: Resolution) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(resolution));
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(Resolution::Failed(
                "task was dropped before it resolved".into(),
            )));
        }
    }
}

/// Result of one [`wait_any`] wake-up.
#[derive(Debug, Default)]
pub struct WaitAny {
    pub resolved: Vec<TaskHandle>,
    pub pending: Vec<TaskHandle>,
}

/// Block until at least one handle resolves, then split the input into
/// everything resolved by now and the rest.
///
/// Returns immediately if any handle is already resolved or the input is
/// empty.
pub async fn wait_any(handles: Vec<TaskHandle>) -> WaitAny {
    if handles.is_empty() {
        return WaitAny::default();
    }

    if !handles.iter().any(TaskHandle::is_resolved) {
        let waits = handles.iter().map(|h| Box::pin(h.resolved()));
        let _ = futures::future::select_all(waits).await;
    }

    let (resolved, pending) = handles.into_iter().partition(TaskHandle::is_resolved);
    WaitAny { resolved, pending }
}
