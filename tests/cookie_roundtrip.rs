use std::error::Error;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use vigil::errors::SyncError;
use vigil::root::{COOKIE_PREFIX, Root, RootOptions};
use vigil::watch::WatcherRegistry;

type TestResult = Result<(), Box<dyn Error>>;

const DEADLINE: Duration = Duration::from_secs(10);

fn start_root(dir: &tempfile::TempDir, options: RootOptions) -> anyhow::Result<Arc<Root>> {
    let registry = WatcherRegistry::with_builtin();
    let root = Root::new(dir.path(), options, &registry)?;
    root.start()?;
    Ok(root)
}

#[test]
fn sync_round_trips_through_the_real_watcher() -> TestResult {
    let dir = tempfile::tempdir()?;
    let root = start_root(&dir, RootOptions::default())?;

    root.sync_to_now(DEADLINE)?;

    // Sentinels never show up as changes and are cleaned off disk.
    assert!(root.changes_since(0).is_empty());
    let leftovers: Vec<_> = fs::read_dir(dir.path())?
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with(COOKIE_PREFIX))
        .collect();
    assert!(leftovers.is_empty(), "stale sentinels: {leftovers:?}");

    root.cancel();
    root.join();
    Ok(())
}

#[test]
fn concurrent_syncs_both_complete() -> TestResult {
    let dir = tempfile::tempdir()?;
    let root = start_root(&dir, RootOptions::default())?;

    let a = {
        let root = Arc::clone(&root);
        std::thread::spawn(move || root.sync_to_now(DEADLINE))
    };
    let b = {
        let root = Arc::clone(&root);
        std::thread::spawn(move || root.sync_to_now(DEADLINE))
    };
    a.join().unwrap()?;
    b.join().unwrap()?;

    root.cancel();
    root.join();
    Ok(())
}

#[test]
fn sync_fails_fast_once_cancelled() -> TestResult {
    let dir = tempfile::tempdir()?;
    let root = start_root(&dir, RootOptions::default())?;

    root.cancel_with_reason("shut down by test");
    root.join();

    let err = root.sync_to_now(DEADLINE).unwrap_err();
    assert!(matches!(err, SyncError::RootCancelled { .. }));
    assert_eq!(root.failure_reason().as_deref(), Some("shut down by test"));
    Ok(())
}

#[test]
fn cookies_relocate_into_a_vcs_directory() -> TestResult {
    let dir = tempfile::tempdir()?;
    fs::create_dir(dir.path().join(".git"))?;

    let root = start_root(&dir, RootOptions::default())?;
    assert!(root.cookies().cookie_dir().ends_with(".git"));

    // The VCS directory is ignored for ordinary changes but its direct
    // children still surface, so the round-trip works from there too.
    root.sync_to_now(DEADLINE)?;

    root.cancel();
    root.join();
    Ok(())
}
