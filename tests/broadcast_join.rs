// tests/broadcast_join.rs

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use fleetrun::broadcast::{FileBroadcast, published_paths};
use fleetrun::config::FileSync;
use fleetrun::pool::{LocalPool, LocalPoolOptions, WorkerPool, hook};
use fleetrun_test_utils::{init_tracing, with_timeout};

/// Relative path -> contents for every file under `root`.
fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(root).unwrap().display().to_string();
                out.insert(rel, std::fs::read(&path).unwrap());
            }
        }
    }
    out
}

#[tokio::test]
async fn late_joiner_converges_to_the_same_tree() {
    init_tracing();

    let src = tempfile::tempdir().unwrap();
    let project = src.path().join("project");
    std::fs::create_dir_all(project.join("pkg/nested")).unwrap();
    std::fs::create_dir_all(project.join(".git")).unwrap();
    std::fs::write(project.join("main.py"), "print('hi')\n").unwrap();
    std::fs::write(project.join("pkg/nested/data.bin"), [0u8, 1, 2, 255]).unwrap();
    std::fs::write(project.join(".git/config"), "[core]\n").unwrap();
    let config = src.path().join("settings.toml");
    std::fs::write(&config, "level = 3\n").unwrap();

    let roots = tempfile::tempdir().unwrap();
    let pool = LocalPool::new(LocalPoolOptions {
        workers: 2,
        threads_per_worker: 1,
        worker_roots: vec![roots.path().join("w0"), roots.path().join("w1")],
    })
    .unwrap();

    with_timeout(
        FileBroadcast::new(&pool).broadcast(&[FileSync::same(&project), FileSync::same(&config)]),
    )
    .await
    .unwrap();
    assert_eq!(published_paths(&pool).len(), 2);

    let joined = with_timeout(pool.add_worker(Some(roots.path().join("w2")))).await;

    let workers = pool.workers();
    let present = &workers[0];
    let expected = snapshot(&present.localize(&project));
    assert!(expected.contains_key("main.py"));
    assert!(!expected.keys().any(|k| k.starts_with(".git")));

    assert_eq!(snapshot(&joined.localize(&project)), expected);
    assert_eq!(
        std::fs::read_to_string(joined.localize(&config)).unwrap(),
        "level = 3\n"
    );
    assert_eq!(snapshot(&workers[1].localize(&project)), expected);
}

#[tokio::test]
async fn rebroadcast_updates_late_joiners_too() {
    init_tracing();

    let src = tempfile::tempdir().unwrap();
    let file = src.path().join("version.txt");
    std::fs::write(&file, "v1").unwrap();

    let roots = tempfile::tempdir().unwrap();
    let pool = LocalPool::new(LocalPoolOptions {
        workers: 1,
        threads_per_worker: 1,
        worker_roots: vec![roots.path().join("w0")],
    })
    .unwrap();
    let bc = FileBroadcast::new(&pool);

    bc.broadcast(&[FileSync::same(&file)]).await.unwrap();
    std::fs::write(&file, "v2").unwrap();
    bc.broadcast(&[FileSync::same(&file)]).await.unwrap();

    assert_eq!(published_paths(&pool).len(), 1);
    let joined = pool.add_worker(Some(roots.path().join("w1"))).await;
    assert_eq!(std::fs::read_to_string(joined.localize(&file)).unwrap(), "v2");
    assert_eq!(
        std::fs::read_to_string(pool.workers()[0].localize(&file)).unwrap(),
        "v2"
    );
}

#[tokio::test]
async fn worker_joining_mid_broadcast_receives_the_new_payload() {
    init_tracing();

    let src = tempfile::tempdir().unwrap();
    let first = src.path().join("a.txt");
    let second = src.path().join("b.txt");
    std::fs::write(&first, "a").unwrap();
    std::fs::write(&second, "b").unwrap();

    let roots = tempfile::tempdir().unwrap();
    let pool = LocalPool::new(LocalPoolOptions {
        workers: 1,
        threads_per_worker: 1,
        worker_roots: vec![roots.path().join("w0")],
    })
    .unwrap();
    let bc = FileBroadcast::new(&pool);
    bc.broadcast(&[FileSync::same(&first)]).await.unwrap();

    // Keeps the joiner busy after it has listed the published files.
    pool.register_join_hook(
        "slow_setup",
        hook(|_env| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok::<(), anyhow::Error>(())
        }),
    );

    let (joined, broadcast) = with_timeout(async {
        tokio::join!(pool.add_worker(Some(roots.path().join("w1"))), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            bc.broadcast(&[FileSync::same(&second)]).await
        })
    })
    .await;
    broadcast.unwrap();

    assert_eq!(pool.workers().len(), 2);
    assert_eq!(std::fs::read_to_string(joined.localize(&first)).unwrap(), "a");
    assert_eq!(std::fs::read_to_string(joined.localize(&second)).unwrap(), "b");
}
