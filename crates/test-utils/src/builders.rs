use fleetrun::config::{BackendSection, FileSyncConfig, RawRunFile, RunFile, TaskConfig};
use fleetrun::tasks::{TaskCommand, TaskSpec};

/// Builder for `RunFile` to simplify test setup.
///
/// Defaults: local results under `/tmp/fleetrun-test/{name}`, a local pool
/// with two workers, a 1s poll interval and no tasks.
pub struct RunFileBuilder {
    raw: RawRunFile,
}

impl RunFileBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawRunFile {
                name: None,
                prefix: None,
                poll_interval: Some("1s".to_string()),
                results: BackendSection::new("local")
                    .with_param("path", "/tmp/fleetrun-test/{name}"),
                executor: BackendSection::new("local").with_param("workers", 2),
                file_sync: Vec::new(),
                task: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.raw.name = Some(name.to_string());
        self
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.raw.prefix = Some(prefix.to_string());
        self
    }

    pub fn poll_interval(mut self, interval: &str) -> Self {
        self.raw.poll_interval = Some(interval.to_string());
        self
    }

    pub fn results(mut self, section: BackendSection) -> Self {
        self.raw.results = section;
        self
    }

    pub fn executor(mut self, section: BackendSection) -> Self {
        self.raw.executor = section;
        self
    }

    pub fn file_sync(mut self, src: &str) -> Self {
        self.raw.file_sync.push(FileSyncConfig {
            src: src.to_string(),
            dest: None,
        });
        self
    }

    /// Shell task with an explicit name.
    pub fn task(mut self, name: &str, command: &str) -> Self {
        self.raw.task.push(TaskConfig {
            name: Some(name.to_string()),
            command: TaskCommand::from(command),
            shell: true,
        });
        self
    }

    /// Task without a name; it is named after its position.
    pub fn unnamed_task(mut self, command: impl Into<TaskCommand>, shell: bool) -> Self {
        self.raw.task.push(TaskConfig {
            name: None,
            command: command.into(),
            shell,
        });
        self
    }

    pub fn raw(self) -> RawRunFile {
        self.raw
    }

    pub fn build(self) -> RunFile {
        RunFile::try_from(self.raw).expect("Failed to build valid run file from builder")
    }
}

impl Default for RunFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shell task spec.
pub fn shell_task(name: &str, command: &str) -> TaskSpec {
    TaskSpec::new(name, command, true)
}
