use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use fleetrun::errors::{FleetError, Result};
use fleetrun::results::{ResultContext, Results};
use tempfile::TempDir;

/// One lifecycle call observed on a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Created,
    Sync,
    SetStatus(String),
    Finish,
    Cleanup,
}

/// A results backend that writes into a temp dir and records every
/// lifecycle call per task.
#[derive(Debug, Clone)]
pub struct RecordingResults {
    root: Arc<TempDir>,
    events: Arc<Mutex<HashMap<String, Vec<Event>>>>,
    fail_sync: bool,
}

impl RecordingResults {
    pub fn new() -> Self {
        Self {
            root: Arc::new(tempfile::tempdir().expect("creating temp dir")),
            events: Arc::new(Mutex::new(HashMap::new())),
            fail_sync: false,
        }
    }

    /// Every `sync()` returns an error.
    pub fn failing_sync(mut self) -> Self {
        self.fail_sync = true;
        self
    }

    pub fn events(&self, task: &str) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .get(task)
            .cloned()
            .unwrap_or_default()
    }

    /// Statuses passed to `set_status`, in call order.
    pub fn statuses(&self, task: &str) -> Vec<String> {
        self.events(task)
            .into_iter()
            .filter_map(|e| match e {
                Event::SetStatus(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, task: &str, event: &Event) -> usize {
        self.events(task).iter().filter(|e| *e == event).count()
    }

    pub fn tasks(&self) -> Vec<String> {
        let mut tasks: Vec<String> = self.events.lock().unwrap().keys().cloned().collect();
        tasks.sort();
        tasks
    }

    /// Where the task's stdout was written.
    pub fn stdout_of(&self, task: &str) -> PathBuf {
        self.root.path().join(task).join("stdout")
    }

    fn record(events: &Mutex<HashMap<String, Vec<Event>>>, task: &str, event: Event) {
        events
            .lock()
            .unwrap()
            .entry(task.to_string())
            .or_default()
            .push(event);
    }
}

impl Default for RecordingResults {
    fn default() -> Self {
        Self::new()
    }
}

impl Results for RecordingResults {
    fn kind(&self) -> &'static str {
        "recording"
    }

    fn create_context(&self, task: &str) -> Result<Box<dyn ResultContext>> {
        let dir = self.root.path().join(task);
        std::fs::create_dir_all(&dir)?;
        Self::record(&self.events, task, Event::Created);
        Ok(Box::new(RecordingContext {
            task: task.to_string(),
            dir,
            events: self.events.clone(),
            fail_sync: self.fail_sync,
        }))
    }
}

struct RecordingContext {
    task: String,
    dir: PathBuf,
    events: Arc<Mutex<HashMap<String, Vec<Event>>>>,
    fail_sync: bool,
}

impl ResultContext for RecordingContext {
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
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn sync(&mut self) -> Result<()> {
        RecordingResults::record(&self.events, &self.task, Event::Sync);
        if self.fail_sync {
            return Err(FleetError::Other(anyhow::anyhow!("sync target unreachable")));
        }
        Ok(())
    }

    fn set_status(&mut self, status: &str) -> Result<()> {
        RecordingResults::record(&self.events, &self.task, Event::SetStatus(status.to_string()));
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        RecordingResults::record(&self.events, &self.task, Event::Finish);
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        RecordingResults::record(&self.events, &self.task, Event::Cleanup);
        Ok(())
    }
}
