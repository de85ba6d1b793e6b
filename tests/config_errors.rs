// tests/config_errors.rs

use fleetrun::config::{BackendSection, load_and_validate, load_from_str};
use fleetrun::errors::FleetError;
use fleetrun::run::{RunCoordinator, RunIdentity};
use fleetrun_test_utils::RunFileBuilder;

fn assert_config_error<T: std::fmt::Debug>(res: Result<T, FleetError>, needle: &str) {
    match res {
        Err(FleetError::ConfigError(msg)) => {
            assert!(msg.contains(needle), "message {msg:?} should mention {needle:?}")
        }
        other => panic!("expected ConfigError mentioning {needle:?}, got {other:?}"),
    }
}

#[test]
fn missing_identity_is_a_config_error() {
    let run = RunFileBuilder::new().task("a", "true").build();
    assert_config_error(RunIdentity::for_run(&run, None, None), "name or prefix");
}

#[test]
fn name_and_prefix_together_are_rejected() {
    let run = RunFileBuilder::new()
        .name("n")
        .prefix("p")
        .task("a", "true")
        .build();
    assert_config_error(RunIdentity::for_run(&run, None, None), "mutually exclusive");
}

#[test]
fn file_sync_with_different_destination_is_rejected() {
    let toml = r#"
name = "x"

[results]
kind = "local"
path = "/tmp/x"

[executor]
kind = "local"

[[file_sync]]
src = "/srv/a"
dest = "/srv/b"

[[task]]
command = "true"
"#;
    assert_config_error(load_from_str(toml), "same");
}

#[test]
fn unknown_results_selector_is_reported_at_construction() {
    let run = RunFileBuilder::new()
        .name("x")
        .results(BackendSection::new("s3"))
        .task("a", "true")
        .build();
    let id = RunIdentity::for_run(&run, None, None).unwrap();
    assert_config_error(RunCoordinator::new(run, id), "s3");
}

#[test]
fn unknown_executor_selector_is_reported_at_construction() {
    let out = tempfile::tempdir().unwrap();
    let run = RunFileBuilder::new()
        .name("x")
        .results(BackendSection::new("local").with_param("path", out.path().to_str().unwrap()))
        .executor(BackendSection::new("dask"))
        .task("a", "true")
        .build();
    let id = RunIdentity::for_run(&run, None, None).unwrap();
    assert_config_error(RunCoordinator::new(run, id), "dask");
}

#[test]
fn zero_workers_means_no_pool() {
    let out = tempfile::tempdir().unwrap();
    let run = RunFileBuilder::new()
        .name("x")
        .results(BackendSection::new("local").with_param("path", out.path().to_str().unwrap()))
        .executor(BackendSection::new("local").with_param("workers", 0))
        .task("a", "true")
        .build();
    let id = RunIdentity::for_run(&run, None, None).unwrap();
    assert!(matches!(
        RunCoordinator::new(run, id),
        Err(FleetError::PoolUnavailable(_))
    ));
}

#[test]
fn run_file_is_loaded_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batch.toml");
    std::fs::write(
        &path,
        r#"
prefix = "batch"

[results]
kind = "mirror"
target = "/tmp/bucket/{name}"

[executor]
kind = "local"
workers = 3

[[task]]
command = ["python", "-c", "print(1)"]

[[task]]
command = "echo two"
shell = true
"#,
    )
    .unwrap();

    let run = load_and_validate(&path).unwrap();
    assert_eq!(run.tasks.len(), 2);
    assert_eq!(run.tasks[0].name, "0");
    assert_eq!(run.tasks[1].name, "1");
    assert!(run.tasks[1].shell);
    assert_eq!(run.results.kind, "mirror");
    assert_eq!(run.poll_interval, fleetrun::config::DEFAULT_POLL_INTERVAL);
}

#[test]
fn missing_run_file_is_an_io_error() {
    let err = load_and_validate("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, FleetError::IoError(_)));
}
