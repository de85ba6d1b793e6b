// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use crate::config::model::{
    BackendSection, DEFAULT_POLL_INTERVAL, FileSync, RawRunFile, RunFile,
};
use crate::errors::{FleetError, Result};
use crate::tasks::TaskSpec;

impl TryFrom<RawRunFile> for RunFile {
    type Error = FleetError;

    fn try_from(raw: RawRunFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        validate_backend("results", &raw.results)?;
        validate_backend("executor", &raw.executor)?;

        let poll_interval = match raw.poll_interval.as_deref() {
            Some(s) => parse_duration(s).map_err(|e| {
                FleetError::config(format!("invalid poll_interval '{s}': {e}"))
            })?,
            None => DEFAULT_POLL_INTERVAL,
        };
        if poll_interval.is_zero() {
            return Err(FleetError::config("poll_interval must be greater than zero"));
        }

        let tasks: Vec<TaskSpec> = raw
            .task
            .into_iter()
            .enumerate()
            .map(|(idx, t)| TaskSpec::from_position(idx, t.name, t.command, t.shell))
            .collect();
        validate_tasks(&tasks)?;

        let file_syncs: Vec<FileSync> = raw.file_sync.into_iter().map(FileSync::from).collect();
        validate_file_syncs(&file_syncs)?;

        Ok(RunFile {
            name: non_empty(raw.name),
            prefix: non_empty(raw.prefix),
            poll_interval,
            results: raw.results,
            executor: raw.executor,
            file_syncs,
            tasks,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn ensure_has_tasks(raw: &RawRunFile) -> Result<()> {
    if raw.task.is_empty() {
        return Err(FleetError::config(
            "run file must contain at least one [[task]] entry",
        ));
    }
    Ok(())
}

fn validate_backend(section: &str, backend: &BackendSection) -> Result<()> {
    if backend.kind.trim().is_empty() {
        return Err(FleetError::config(format!(
            "[{section}].kind must name a backend"
        )));
    }
    Ok(())
}

fn validate_tasks(tasks: &[TaskSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for task in tasks {
        if task.name.contains('/') {
            return Err(FleetError::config(format!(
                "task name '{}' must not contain '/'",
                task.name
            )));
        }
        if task.name == "." || task.name == ".." {
            return Err(FleetError::config(format!(
                "task name '{}' is reserved",
                task.name
            )));
        }
        if !seen.insert(task.name.as_str()) {
            return Err(FleetError::config(format!(
                "duplicate task name '{}'",
                task.name
            )));
        }
        if task.command.is_empty() {
            return Err(FleetError::config(format!(
                "task '{}' has an empty command",
                task.name
            )));
        }
    }
    Ok(())
}

/// Source and destination must currently be the same path.
pub(crate) fn validate_file_syncs(file_syncs: &[FileSync]) -> Result<()> {
    for fs in file_syncs {
        if fs.src != fs.dest {
            return Err(FleetError::config(format!(
                "file_sync src and dest must currently be the same ({} != {})",
                fs.src.display(),
                fs.dest.display()
            )));
        }
    }
    Ok(())
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;

    const BACKENDS: &str = r#"
[results]
kind = "local"
path = "/tmp/out/{name}"

[executor]
kind = "local"
workers = 2
"#;

    fn run_file(body: &str) -> Result<RunFile> {
        load_from_str(&format!("{BACKENDS}\n{body}"))
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = run_file(
            r#"
[[task]]
command = "echo one"

[[task]]
name = "two"
command = ["echo", "two"]
shell = false

[[file_sync]]
src = "/srv/code"
"#,
        )
        .unwrap();

        assert_eq!(cfg.tasks[0].name, "0");
        assert!(!cfg.tasks[0].shell);
        assert_eq!(cfg.tasks[1].name, "two");
        assert_eq!(cfg.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(cfg.file_syncs, vec![FileSync::same("/srv/code")]);
        assert_eq!(
            cfg.results.params.get("path").and_then(|v| v.as_str()),
            Some("/tmp/out/{name}")
        );
    }

    #[test]
    fn duplicate_task_names_are_rejected() {
        let err = run_file(
            r#"
[[task]]
name = "a"
command = "true"

[[task]]
name = "a"
command = "false"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, FleetError::ConfigError(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn implicit_index_name_can_collide_with_explicit_name() {
        let err = run_file(
            r#"
[[task]]
command = "true"

[[task]]
name = "0"
command = "true"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, FleetError::ConfigError(_)));
    }

    #[test]
    fn mismatched_file_sync_is_a_config_error() {
        let err = run_file(
            r#"
[[task]]
command = "true"

[[file_sync]]
src = "/a"
dest = "/b"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, FleetError::ConfigError(msg) if msg.contains("same")));
    }

    #[test]
    fn empty_task_list_is_rejected() {
        let err = run_file("").unwrap_err();
        assert!(matches!(err, FleetError::ConfigError(_)));
    }

    #[test]
    fn poll_interval_is_parsed() {
        let cfg = load_from_str(&format!(
            "poll_interval = \"250ms\"\n{BACKENDS}\n[[task]]\ncommand = \"true\"\n"
        ))
        .unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));

        let err = load_from_str(&format!(
            "poll_interval = \"0s\"\n{BACKENDS}\n[[task]]\ncommand = \"true\"\n"
        ))
        .unwrap_err();
        assert!(matches!(err, FleetError::ConfigError(_)));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("12").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn oversized_duration_is_an_error() {
        let max = u64::MAX.to_string();
        assert!(parse_duration(&format!("{max}h")).is_err());
        assert!(parse_duration(&format!("{max}m")).is_err());
        assert_eq!(
            parse_duration(&format!("{max}s")).unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn dot_task_names_are_rejected() {
        for name in [".", ".."] {
            let err = run_file(&format!("[[task]]\nname = \"{name}\"\ncommand = \"true\"\n"))
                .unwrap_err();
            assert!(matches!(err, FleetError::ConfigError(msg) if msg.contains("reserved")));
        }
    }
}
