// src/process/reaper.rs

//! Running-pid bookkeeping and process-tree cleanup.
//!
//! Every supervised task registers its pid here while it runs. On worker
//! teardown (or Ctrl-C) [`cleanup_all`] walks the set and, for each pid,
//! takes a snapshot of its descendants and:
//!
//! 1. sends SIGKILL to every descendant,
//! 2. waits up to [`REAP_WAIT`] for each one to disappear,
//! 3. sends SIGTERM to whatever is left.
//!
//! Each step treats "no such process" as success, so one vanished or stuck
//! descendant never stops the others from being handled.

use std::collections::HashSet;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

/// Bounded wait for a killed descendant to go away.
pub const REAP_WAIT: Duration = Duration::from_secs(1);

static RUNNING_PIDS: LazyLock<Mutex<HashSet<u32>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

fn pids() -> std::sync::MutexGuard<'static, HashSet<u32>> {
    // A panic while holding the lock leaves the set itself consistent.
    RUNNING_PIDS.lock().unwrap_or_else(|e| e.into_inner())
}

/// Snapshot of the pids currently registered as running.
pub fn running_pids() -> Vec<u32> {
    let mut out: Vec<u32> = pids().iter().copied().collect();
    out.sort_unstable();
    out
}

pub fn is_running(pid: u32) -> bool {
    pids().contains(&pid)
}

/// Registration of one running pid; unregisters on drop.
#[derive(Debug)]
pub struct RunningPid {
    pid: u32,
}

impl RunningPid {
    pub fn register(pid: u32) -> Self {
        pids().insert(pid);
        debug!(pid, "registered running pid");
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for RunningPid {
    fn drop(&mut self) {
        pids().remove(&self.pid);
        debug!(pid = self.pid, "unregistered running pid");
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReapError {
    #[error("no such process: {0}")]
    NoSuchProcess(u32),

    #[error("process {0} still alive after wait")]
    StillAlive(u32),

    #[error("signalling process {pid} failed: {reason}")]
    Signal { pid: u32, reason: String },
}

/// Operations the cleanup policy needs from the OS.
pub trait ProcessTable {
    /// Snapshot of all (recursive) descendants of `pid`.
    fn descendants(&self, pid: u32) -> Result<Vec<u32>, ReapError>;

    fn kill(&self, pid: u32) -> Result<(), ReapError>;

    fn wait_gone(&self, pid: u32, timeout: Duration) -> Result<(), ReapError>;

    fn terminate(&self, pid: u32) -> Result<(), ReapError>;
}

/// Clean up the process tree below `pid` using the real OS.
pub fn cleanup(pid: u32) -> usize {
    cleanup_with(&SystemProcessTable, pid)
}

/// Sweep every registered pid. Drains the running set.
pub fn cleanup_all() -> usize {
    cleanup_all_with(&SystemProcessTable)
}

pub fn cleanup_all_with(table: &dyn ProcessTable) -> usize {
    let snapshot: Vec<u32> = pids().drain().collect();
    if !snapshot.is_empty() {
        info!(pids = ?snapshot, "cleaning up running task processes");
    }
    snapshot.into_iter().map(|pid| cleanup_with(table, pid)).sum()
}

/// Apply the kill / wait / terminate policy to the descendants of `pid`.
///
/// Returns the number of descendants found in the snapshot.
pub fn cleanup_with(table: &dyn ProcessTable, pid: u32) -> usize {
    let procs = match table.descendants(pid) {
        Ok(procs) => procs,
        Err(ReapError::NoSuchProcess(_)) => {
            debug!(pid, "process already gone; nothing to clean up");
            return 0;
        }
        Err(e) => {
            warn!(pid, error = %e, "could not enumerate descendants");
            return 0;
        }
    };

    debug!(pid, descendants = ?procs, "cleaning up process tree");

    for &child in &procs {
        tolerate(child, "kill", table.kill(child));
    }
    for &child in &procs {
        tolerate(child, "wait", table.wait_gone(child, REAP_WAIT));
    }
    for &child in &procs {
        tolerate(child, "terminate", table.terminate(child));
    }

    procs.len()
}

fn tolerate(pid: u32, step: &str, res: Result<(), ReapError>) {
    match res {
        Ok(()) | Err(ReapError::NoSuchProcess(_)) => {}
        Err(e) => warn!(pid, step, error = %e, "process cleanup step failed"),
    }
}

/// [`ProcessTable`] backed by `/proc` and POSIX signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

#[cfg(target_os = "linux")]
impl SystemProcessTable {
    fn parent_links() -> Result<Vec<(u32, u32)>, ReapError> {
        let all = procfs::process::all_processes().map_err(|e| ReapError::Signal {
            pid: 0,
            reason: format!("reading /proc: {e}"),
        })?;
        // Processes can exit while we iterate; skip those.
        Ok(all
            .filter_map(|p| p.ok())
            .filter_map(|p| p.stat().ok())
            .map(|stat| (stat.pid as u32, stat.ppid as u32))
            .collect())
    }

    fn alive(pid: u32) -> bool {
        match procfs::process::Process::new(pid as i32).and_then(|p| p.stat()) {
            Ok(stat) => stat.state != 'Z' && stat.state != 'X',
            Err(_) => false,
        }
    }
}

#[cfg(target_os = "linux")]
impl ProcessTable for SystemProcessTable {
    fn descendants(&self, pid: u32) -> Result<Vec<u32>, ReapError> {
        if procfs::process::Process::new(pid as i32).is_err() {
            return Err(ReapError::NoSuchProcess(pid));
        }
        let links = Self::parent_links()?;

        let mut out = Vec::new();
        let mut frontier = vec![pid];
        while let Some(parent) = frontier.pop() {
            for &(child, ppid) in &links {
                if ppid == parent && child != pid && !out.contains(&child) {
                    out.push(child);
                    frontier.push(child);
                }
            }
        }
        Ok(out)
    }

    fn kill(&self, pid: u32) -> Result<(), ReapError> {
        send_signal(pid, nix::sys::signal::Signal::SIGKILL)
    }

    fn wait_gone(&self, pid: u32, timeout: Duration) -> Result<(), ReapError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if !Self::alive(pid) {
                return Ok(());
            }
            if std::time::Instant::now() >= deadline {
                return Err(ReapError::StillAlive(pid));
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    fn terminate(&self, pid: u32) -> Result<(), ReapError> {
        send_signal(pid, nix::sys::signal::Signal::SIGTERM)
    }
}

#[cfg(target_os = "linux")]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> Result<(), ReapError> {
    use nix::errno::Errno;
    use nix::unistd::Pid;

    match nix::sys::signal::kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(ReapError::NoSuchProcess(pid)),
        Err(e) => Err(ReapError::Signal {
            pid,
            reason: e.to_string(),
        }),
    }
}

// Descendant enumeration needs /proc; elsewhere the sweep is a no-op and
// the direct child is still killed through `kill_on_drop`.
#[cfg(not(target_os = "linux"))]
impl ProcessTable for SystemProcessTable {
    fn descendants(&self, _pid: u32) -> Result<Vec<u32>, ReapError> {
        Ok(Vec::new())
    }

    fn kill(&self, pid: u32) -> Result<(), ReapError> {
        Err(ReapError::NoSuchProcess(pid))
    }

    fn wait_gone(&self, _pid: u32, _timeout: Duration) -> Result<(), ReapError> {
        Ok(())
    }

    fn terminate(&self, pid: u32) -> Result<(), ReapError> {
        Err(ReapError::NoSuchProcess(pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Fake table: a fixed tree, with some pids vanishing at a given step.
    #[derive(Default)]
    struct FakeTable {
        tree: HashMap<u32, Vec<u32>>,
        vanish_on_kill: HashSet<u32>,
        gone: RefCell<HashSet<u32>>,
        calls: RefCell<Vec<(&'static str, u32)>>,
    }

    impl FakeTable {
        fn check(&self, step: &'static str, pid: u32) -> Result<(), ReapError> {
            self.calls.borrow_mut().push((step, pid));
            if self.gone.borrow().contains(&pid) {
                return Err(ReapError::NoSuchProcess(pid));
            }
            Ok(())
        }
    }

    impl ProcessTable for FakeTable {
        fn descendants(&self, pid: u32) -> Result<Vec<u32>, ReapError> {
            let mut out = Vec::new();
            let mut frontier = vec![pid];
            while let Some(p) = frontier.pop() {
                for &c in self.tree.get(&p).into_iter().flatten() {
                    out.push(c);
                    frontier.push(c);
                }
            }
            if out.is_empty() && !self.tree.contains_key(&pid) {
                return Err(ReapError::NoSuchProcess(pid));
            }
            Ok(out)
        }

        fn kill(&self, pid: u32) -> Result<(), ReapError> {
            if self.vanish_on_kill.contains(&pid) {
                self.gone.borrow_mut().insert(pid);
            }
            self.check("kill", pid)
        }

        fn wait_gone(&self, pid: u32, _timeout: Duration) -> Result<(), ReapError> {
            self.check("wait", pid)
        }

        fn terminate(&self, pid: u32) -> Result<(), ReapError> {
            self.check("terminate", pid)
        }
    }

    #[test]
    fn vanished_child_does_not_stop_its_sibling() {
        let table = FakeTable {
            tree: HashMap::from([(100, vec![101, 102])]),
            vanish_on_kill: HashSet::from([101]),
            ..Default::default()
        };

        assert_eq!(cleanup_with(&table, 100), 2);

        let calls = table.calls.borrow();
        for step in ["kill", "wait", "terminate"] {
            assert!(calls.contains(&(step, 102)), "missing {step} for 102");
            assert!(calls.contains(&(step, 101)), "missing {step} for 101");
        }
        // All kills happen before any wait, all waits before any terminate.
        let order: Vec<&str> = calls.iter().map(|(s, _)| *s).collect();
        assert_eq!(order, ["kill", "kill", "wait", "wait", "terminate", "terminate"]);
    }

    #[test]
    fn grandchildren_are_included() {
        let table = FakeTable {
            tree: HashMap::from([(1, vec![2]), (2, vec![3])]),
            ..Default::default()
        };
        assert_eq!(cleanup_with(&table, 1), 2);
    }

    #[test]
    fn missing_root_is_a_no_op() {
        let table = FakeTable::default();
        assert_eq!(cleanup_with(&table, 42), 0);
        assert!(table.calls.borrow().is_empty());
    }

    #[test]
    fn cleanup_all_visits_every_registered_pid() {
        // Only this test drains the global set, so the guard checks are
        // done here rather than in a parallel test.
        let guard = RunningPid::register(4_000_010);
        assert!(running_pids().contains(&4_000_010));
        drop(guard);
        assert!(!is_running(4_000_010));

        let a = RunningPid::register(4_000_001);
        let b = RunningPid::register(4_000_002);
        assert!(is_running(a.pid()));

        let table = FakeTable {
            tree: HashMap::from([(4_000_001, vec![7]), (4_000_002, vec![8, 9])]),
            ..Default::default()
        };
        let found = cleanup_all_with(&table);
        assert!(found >= 3);
        assert!(!is_running(a.pid()));
        assert!(!is_running(b.pid()));

        let calls = table.calls.borrow();
        for pid in [7, 8, 9] {
            assert!(calls.contains(&("kill", pid)));
        }
        // Dropping after the sweep is harmless.
        drop(a);
        drop(b);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn system_table_reports_missing_pid() {
        // Larger than the default pid_max, so never allocated.
        let table = SystemProcessTable;
        assert_eq!(
            table.descendants(4_194_305),
            Err(ReapError::NoSuchProcess(4_194_305))
        );
    }
}
