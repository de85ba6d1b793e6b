// tests/run_scenario.rs

use std::sync::Arc;

use fleetrun::config::load_from_str;
use fleetrun::pool::{LocalPool, LocalPoolOptions, NamespaceKey, WorkerPool};
use fleetrun::run::{RunCoordinator, RunIdentity};
use fleetrun_test_utils::{Event, RecordingResults, RunFileBuilder, init_tracing, with_timeout};

fn local_pool(workers: usize) -> Arc<dyn WorkerPool> {
    Arc::new(
        LocalPool::new(LocalPoolOptions {
            workers,
            ..Default::default()
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn failing_task_does_not_affect_its_sibling() {
    init_tracing();

    let run = RunFileBuilder::new()
        .name("scenario")
        .task("a", "exit 0")
        .task("b", "exit 1")
        .build();
    let identity = RunIdentity::for_run(&run, None, None).unwrap();
    let results = RecordingResults::new();
    let coordinator =
        RunCoordinator::with_backends(run, identity, Arc::new(results.clone()), local_pool(2));

    let report = with_timeout(coordinator.execute(false)).await.unwrap();

    assert_eq!(results.statuses("a"), vec!["0"]);
    assert_eq!(results.statuses("b"), vec!["1"]);
    for task in ["a", "b"] {
        assert_eq!(results.count(task, &Event::Finish), 1);
        assert_eq!(results.count(task, &Event::Cleanup), 1);
        assert_eq!(results.events(task).last(), Some(&Event::Cleanup));
    }

    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.succeeded[0].task, "a");
    assert_eq!(report.failed_tasks(), vec!["b"]);

    let ns = coordinator.pool().namespace();
    assert!(ns.fetch(&NamespaceKey::task("scenario", "a")).is_none());
    assert!(ns.fetch(&NamespaceKey::task("scenario", "b")).is_none());
    assert!(ns.fetch(&NamespaceKey::run_index("scenario")).is_some());
}

#[tokio::test]
async fn run_file_end_to_end_with_local_results() {
    init_tracing();

    let out = tempfile::tempdir().unwrap();
    let toml = format!(
        r#"
prefix = "e2e"
poll_interval = "200ms"

[results]
kind = "local"
path = "{}/{{name}}"

[executor]
kind = "local"
workers = 2

[[task]]
command = "echo first; echo data > \"$RESULTS_DIR/out.txt\""
shell = true

[[task]]
name = "argv"
command = ["echo", "second"]
"#,
        out.path().display()
    );

    let run = load_from_str(&toml).unwrap();
    let identity = RunIdentity::for_run(&run, None, None).unwrap();
    assert!(identity.name.starts_with("e2e-"));

    let coordinator = RunCoordinator::new(run, identity).unwrap();
    let report = with_timeout(coordinator.execute(true)).await.unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.collected(), 2);

    let run_dir = out.path().join(coordinator.name());
    let read = |p: &str| std::fs::read_to_string(run_dir.join(p)).unwrap();
    assert_eq!(read("0/stdout"), "first\n");
    assert_eq!(read("0/results/out.txt"), "data\n");
    assert_eq!(read("0/status"), "0");
    assert_eq!(read("argv/stdout"), "second\n");
}

#[tokio::test]
async fn cli_name_replaces_the_file_identity() {
    let run = RunFileBuilder::new().prefix("nightly").task("a", "true").build();

    let id = RunIdentity::for_run(&run, Some("adhoc"), None).unwrap();
    assert_eq!(id.name, "adhoc");

    let id = RunIdentity::for_run(&run, None, None).unwrap();
    assert!(id.name.starts_with("nightly-"));
    assert!(id.name.ends_with('Z'));
}
