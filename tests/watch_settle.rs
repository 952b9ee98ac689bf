use std::error::Error;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use vigil::root::publish::Subscriber;
use vigil::root::{Root, RootOptions};
use vigil::watch::WatcherRegistry;

type TestResult = Result<(), Box<dyn Error>>;

const SETTLE: Duration = Duration::from_millis(50);
const DEADLINE: Duration = Duration::from_secs(10);

fn start_root(dir: &tempfile::TempDir, options: RootOptions) -> anyhow::Result<Arc<Root>> {
    let registry = WatcherRegistry::with_builtin();
    let root = Root::new(dir.path(), options, &registry)?;
    root.start()?;
    Ok(root)
}

fn options() -> RootOptions {
    RootOptions {
        settle: SETTLE,
        ..RootOptions::default()
    }
}

/// Wait until a settled event with a tick past `after_tick` arrives.
fn wait_for_settle(sub: &Subscriber, after_tick: u64) -> Option<u64> {
    let deadline = Instant::now() + DEADLINE;
    while Instant::now() < deadline {
        match sub.wait_next(Duration::from_millis(200)) {
            Ok(Some(event)) if event.settled && event.tick > after_tick => {
                return Some(event.tick);
            }
            Ok(Some(_)) | Err(_) => continue,
            Ok(None) => return None,
        }
    }
    None
}

#[test]
fn settled_event_follows_a_change() -> TestResult {
    let dir = tempfile::tempdir()?;
    let root = start_root(&dir, options())?;
    let sub = root.subscribe();

    // Prove the watch is live before generating the change.
    root.sync_to_now(DEADLINE)?;
    let before = root.tick();

    fs::write(dir.path().join("hello.txt"), b"hi")?;
    let settled_tick = wait_for_settle(&sub, before).expect("no settled event observed");
    assert!(settled_tick > before);

    let records = root.changes_since(before);
    assert!(
        records.iter().any(|r| r.name == "hello.txt" && r.exists),
        "expected hello.txt in {records:?}"
    );

    root.cancel();
    root.join();
    Ok(())
}

#[test]
fn deleted_file_is_recorded_as_gone() -> TestResult {
    let dir = tempfile::tempdir()?;
    let root = start_root(&dir, options())?;
    let sub = root.subscribe();
    root.sync_to_now(DEADLINE)?;

    let path = dir.path().join("doomed.txt");
    fs::write(&path, b"bye")?;
    let tick = wait_for_settle(&sub, root.tick().saturating_sub(1)).expect("create not settled");

    fs::remove_file(&path)?;
    wait_for_settle(&sub, tick).expect("delete not settled");

    let records = root.changes_since(0);
    let record = records
        .iter()
        .find(|r| r.name == "doomed.txt")
        .expect("doomed.txt never recorded");
    assert!(!record.exists);

    root.cancel();
    root.join();
    Ok(())
}

#[test]
fn ignored_directories_yield_no_records() -> TestResult {
    let dir = tempfile::tempdir()?;
    fs::create_dir(dir.path().join("skip"))?;

    let mut opts = options();
    opts.ignore_dirs = vec!["skip".into()];
    let root = start_root(&dir, opts)?;
    let sub = root.subscribe();
    root.sync_to_now(DEADLINE)?;

    fs::write(dir.path().join("skip").join("hidden.txt"), b"x")?;
    fs::write(dir.path().join("seen.txt"), b"y")?;
    wait_for_settle(&sub, 0).expect("no settled event observed");

    let names: Vec<String> = root.changes_since(0).into_iter().map(|r| r.name).collect();
    assert!(names.contains(&"seen.txt".to_string()), "{names:?}");
    assert!(
        !names.iter().any(|n| n.starts_with("skip/")),
        "ignored path leaked into {names:?}"
    );

    root.cancel();
    root.join();
    Ok(())
}

#[test]
fn watch_survives_a_recoverable_recrawl() -> TestResult {
    let dir = tempfile::tempdir()?;
    let root = start_root(&dir, options())?;
    let sub = root.subscribe();
    root.sync_to_now(DEADLINE)?;

    root.schedule_recrawl("transient notification hiccup");

    // The OS watch must still be alive afterwards: cookies round-trip and
    // new changes surface.
    root.sync_to_now(DEADLINE)?;
    let before = root.tick();
    fs::write(dir.path().join("after-recrawl.txt"), b"x")?;
    wait_for_settle(&sub, before).expect("no settled event after recrawl");
    assert!(
        root.changes_since(before)
            .iter()
            .any(|r| r.name == "after-recrawl.txt")
    );

    let deadline = Instant::now() + DEADLINE;
    while root.recrawl_count() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(root.recrawl_count(), 1);

    root.cancel();
    root.join();
    Ok(())
}

#[test]
fn cancellation_is_published_and_terminal() -> TestResult {
    let dir = tempfile::tempdir()?;
    let root = start_root(&dir, options())?;
    let sub = root.subscribe();

    assert!(root.cancel());
    assert!(!root.cancel());
    root.join();

    let deadline = Instant::now() + DEADLINE;
    loop {
        assert!(Instant::now() < deadline, "no cancel event observed");
        match sub.wait_next(Duration::from_millis(200)) {
            Ok(Some(event)) if event.canceled => break,
            _ => continue,
        }
    }

    // A dead root refuses further syncs.
    assert!(root.sync_to_now(Duration::from_millis(100)).is_err());
    Ok(())
}

#[test]
fn clock_strings_carry_the_root_number() -> TestResult {
    let dir = tempfile::tempdir()?;
    let registry = WatcherRegistry::with_builtin();
    let root = Root::new(dir.path(), options(), &registry)?;

    let clock = root.current_clock();
    assert_eq!(clock, format!("c:{}:{}", root.number(), root.tick()));

    root.cancel();
    Ok(())
}
