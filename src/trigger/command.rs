// src/trigger/command.rs

use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::errors::TriggerConfigError;
use crate::query::{GlobQuery, PathMatcher};
use crate::root::publish::Subscriber;
use crate::root::{FileRecord, Root};
use crate::trigger::def::{
    Redirect, StdinStyle, TriggerDefinition, parse_redirection, parse_stdin_spec,
};

/// How often a waiting worker re-checks its child and stop flag.
const CHILD_POLL: Duration = Duration::from_millis(50);

/// One configured trigger: a validated definition plus the worker thread
/// that subscribes to settled events and manages the child process.
///
/// Lifecycle discipline: `stop()` must be called (and must have returned)
/// before a started `TriggerCommand` is dropped. Dropping one whose thread
/// is still running is a programming error and panics loudly rather than
/// silently leaking the thread.
pub struct TriggerCommand {
    def: TriggerDefinition,
    shared: Arc<Shared>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

struct Shared {
    name: String,
    query: GlobQuery,
    command: Vec<String>,
    append_files: bool,
    stdin_style: StdinStyle,
    max_files_stdin: usize,
    stdout: Redirect,
    stderr: Redirect,
    env: Vec<(String, String)>,

    /// Set by any thread calling `stop()`; observed cooperatively.
    stop: AtomicBool,
    /// Run clock: changes at or before this tick have been handled.
    last_run_tick: AtomicU64,
    /// Currently executing child, shared so `stop()` can terminate it.
    current_child: Mutex<Option<Child>>,
}

impl TriggerCommand {
    /// Validate `def` fully and build the command. No thread is started and
    /// nothing is partially applied on error.
    pub fn new(root: &Root, def: &TriggerDefinition) -> Result<Self, TriggerConfigError> {
        if def.name.is_empty() {
            return Err(TriggerConfigError::MissingName);
        }
        if def.command.is_empty() {
            return Err(TriggerConfigError::InvalidCommand);
        }
        if def.max_files_stdin < 0 {
            return Err(TriggerConfigError::NegativeMaxFiles);
        }

        let query = def.expression.compile()?;
        let stdin_style = parse_stdin_spec(def.stdin.as_ref())?;
        let stdout = parse_redirection("stdout", def.stdout.as_deref())?.rebase(root.path());
        let stderr = parse_redirection("stderr", def.stderr.as_deref())?.rebase(root.path());

        let mut env = vec![
            (
                "VIGIL_ROOT".to_string(),
                root.path().to_string_lossy().into_owned(),
            ),
            ("VIGIL_TRIGGER".to_string(), def.name.clone()),
        ];
        if let Some(sock) = root.sock_path() {
            env.push((
                "VIGIL_SOCK".to_string(),
                sock.to_string_lossy().into_owned(),
            ));
        }

        let (stop_tx, stop_rx) = unbounded();
        Ok(Self {
            def: def.clone(),
            shared: Arc::new(Shared {
                name: def.name.clone(),
                query,
                command: def.command.clone(),
                append_files: def.append_files,
                stdin_style,
                max_files_stdin: def.max_files_stdin as usize,
                stdout,
                stderr,
                env,
                stop: AtomicBool::new(false),
                last_run_tick: AtomicU64::new(0),
                current_child: Mutex::new(None),
            }),
            stop_tx,
            stop_rx,
            thread: None,
        })
    }

    pub fn definition(&self) -> &TriggerDefinition {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[cfg(test)]
    pub(crate) fn last_run_tick(&self) -> u64 {
        self.shared.last_run_tick.load(Ordering::Acquire)
    }

    /// Subscribe to the root's unilateral events and launch the worker
    /// thread. Must be called at most once.
    pub fn start(&mut self, root: &Arc<Root>) {
        assert!(self.thread.is_none(), "trigger started twice");

        let subscriber = root.subscribe();
        let shared = Arc::clone(&self.shared);
        let root = Arc::clone(root);
        let stop_rx = self.stop_rx.clone();
        let name = format!("vigil-trigger {} {}", self.shared.name, root.path().display());

        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || shared.run(&root, subscriber, stop_rx))
            .expect("failed to spawn trigger thread");
        self.thread = Some(handle);
    }

    /// Request the worker to stop, terminate any running child, and join
    /// the thread. Callers must not erase or replace the trigger until this
    /// returns.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        let _ = self.stop_tx.send(());
        if let Some(child) = self.shared.current_child.lock().as_mut() {
            let _ = child.kill();
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TriggerCommand {
    fn drop(&mut self) {
        if self.thread.is_some() && !self.shared.stop.load(Ordering::Acquire) {
            panic!(
                "destroying trigger '{}' without stopping it first",
                self.shared.name
            );
        }
    }
}

impl Shared {
    fn run(self: Arc<Self>, root: &Arc<Root>, subscriber: Subscriber, stop_rx: Receiver<()>) {
        debug!(trigger = %self.name, "waiting for settle");

        'outer: while !self.stopping(root) {
            select! {
                recv(stop_rx) -> _ => break,
                recv(subscriber.channel()) -> msg => {
                    let Ok(first) = msg else { break };
                    // Drain everything buffered on this wakeup.
                    let mut item = Some(first);
                    while let Some(event) = item {
                        if event.canceled || self.stopping(root) {
                            break 'outer;
                        }
                        if event.settled && self.maybe_spawn(root) {
                            self.wait_no_intr();
                        }
                        item = subscriber.get_next();
                    }
                }
            }
        }

        debug!(trigger = %self.name, "out of loop");
    }

    fn stopping(&self, root: &Root) -> bool {
        self.stop.load(Ordering::Acquire) || root.is_cancelled()
    }

    /// Spawn a child for the current match set, if there is one.
    ///
    /// At most one child per trigger runs at a time: callers only invoke
    /// this when no child from this trigger is executing, and later settle
    /// events are re-checked once the current child exits.
    ///
    /// Returns whether a child was spawned. A spawn failure leaves the run
    /// clock untouched so the trigger stays armed for the next settle.
    fn maybe_spawn(&self, root: &Root) -> bool {
        let since = self.last_run_tick.load(Ordering::Acquire);
        // Snapshot the clock before matching: a change logged while we
        // match carries a later tick and is re-examined on the next settle,
        // duplicating a run at worst rather than dropping the change.
        let run_tick = root.tick();
        let matched: Vec<FileRecord> = root
            .changes_since(since)
            .into_iter()
            .filter(|record| self.query.matches(&record.name))
            .collect();
        if matched.is_empty() {
            return false;
        }

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        if self.append_files {
            for record in &matched {
                cmd.arg(&record.name);
            }
        }
        cmd.current_dir(root.path());
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.stdin(match self.stdin_style {
            StdinStyle::DevNull => Stdio::null(),
            _ => Stdio::piped(),
        });

        match self.stdout.open() {
            Ok(stdio) => cmd.stdout(stdio),
            Err(e) => {
                error!(trigger = %self.name, error = %e, "failed to open stdout destination");
                return false;
            }
        };
        match self.stderr.open() {
            Ok(stdio) => cmd.stderr(stdio),
            Err(e) => {
                error!(trigger = %self.name, error = %e, "failed to open stderr destination");
                return false;
            }
        };

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(
                    trigger = %self.name,
                    command = %self.command[0],
                    error = %e,
                    "failed to spawn trigger command"
                );
                return false;
            }
        };

        let pid = child.id();
        let stdin = child.stdin.take();
        // Publish the child before feeding stdin: a child that never reads
        // can block us on a full pipe, and `stop()` must be able to kill it
        // (closing the read end) to unblock the write.
        *self.current_child.lock() = Some(child);
        if let Some(stdin) = stdin {
            self.feed_stdin(stdin, &matched);
        }

        info!(
            trigger = %self.name,
            pid,
            matched = matched.len(),
            tick = run_tick,
            "spawned trigger command"
        );
        self.last_run_tick.store(run_tick, Ordering::Release);
        true
    }

    fn feed_stdin(&self, mut stdin: ChildStdin, matched: &[FileRecord]) {
        let cap = if self.max_files_stdin == 0 {
            matched.len()
        } else {
            matched.len().min(self.max_files_stdin)
        };

        for record in &matched[..cap] {
            let result = match &self.stdin_style {
                StdinStyle::NamePerLine => writeln!(stdin, "{}", record.name),
                StdinStyle::Json(fields) => {
                    let mut obj = serde_json::Map::new();
                    for field in fields {
                        let value = match field {
                            super::def::RecordField::Name => {
                                serde_json::Value::String(record.name.clone())
                            }
                            super::def::RecordField::Exists => {
                                serde_json::Value::Bool(record.exists)
                            }
                        };
                        obj.insert(field.as_str().to_string(), value);
                    }
                    writeln!(stdin, "{}", serde_json::Value::Object(obj))
                }
                StdinStyle::DevNull => return,
            };
            if let Err(e) = result {
                // Child closed its end early; that is its prerogative.
                debug!(trigger = %self.name, error = %e, "stopped feeding stdin");
                return;
            }
        }
        // Dropping `stdin` closes the pipe after the (possibly capped) write.
    }

    /// Block until the current child exits, staying responsive to stop
    /// requests (which terminate the child).
    fn wait_no_intr(&self) {
        loop {
            let mut guard = self.current_child.lock();
            let Some(child) = guard.as_mut() else {
                return;
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!(
                        trigger = %self.name,
                        success = status.success(),
                        code = status.code().unwrap_or(-1),
                        "trigger command exited"
                    );
                    *guard = None;
                    return;
                }
                Ok(None) => {
                    if self.stop.load(Ordering::Acquire) {
                        let _ = child.kill();
                    }
                }
                Err(e) => {
                    warn!(trigger = %self.name, error = %e, "error waiting for trigger command");
                    *guard = None;
                    return;
                }
            }
            drop(guard);
            std::thread::sleep(CHILD_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::query::QuerySpec;
    use crate::root::RootOptions;
    use crate::trigger::def::StdinSpec;
    use crate::watch::WatcherRegistry;

    fn test_root() -> (tempfile::TempDir, Arc<Root>) {
        let dir = tempfile::tempdir().unwrap();
        let registry = WatcherRegistry::with_builtin();
        let root = Root::new(dir.path(), RootOptions::default(), &registry).unwrap();
        (dir, root)
    }

    fn definition(command: &[&str]) -> TriggerDefinition {
        TriggerDefinition {
            name: "t".into(),
            expression: QuerySpec::default(),
            command: command.iter().map(|s| s.to_string()).collect(),
            append_files: false,
            stdin: None,
            max_files_stdin: 0,
            stdout: None,
            stderr: None,
        }
    }

    #[cfg(unix)]
    #[test]
    fn run_clock_advances_to_the_pre_match_snapshot() {
        let (_dir, root) = test_root();
        root.bump_tick();
        root.record_change("a.txt");

        let cmd = TriggerCommand::new(&root, &definition(&["true"])).unwrap();
        assert!(cmd.shared.maybe_spawn(&root));
        assert_eq!(cmd.last_run_tick(), 1);
        cmd.shared.wait_no_intr();

        // Anything logged at a later tick stays visible to the next run.
        root.bump_tick();
        root.record_change("b.txt");
        let next: Vec<String> = root
            .changes_since(cmd.last_run_tick())
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(next, vec!["b.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn stop_unblocks_a_worker_stuck_feeding_stdin() {
        let (_dir, root) = test_root();
        root.bump_tick();
        // Well past any pipe buffer once written one name per line.
        let stem = "f".repeat(64);
        for i in 0..4096 {
            root.record_change(&format!("{stem}-{i}"));
        }

        let mut def = definition(&["sleep", "30"]);
        def.stdin = Some(StdinSpec::Mode("NAME_PER_LINE".into()));
        let mut cmd = TriggerCommand::new(&root, &def).unwrap();

        let shared = Arc::clone(&cmd.shared);
        let worker_root = Arc::clone(&root);
        let worker = std::thread::spawn(move || shared.maybe_spawn(&worker_root));

        // The child must become visible while the worker is still writing.
        let deadline = Instant::now() + Duration::from_secs(5);
        while cmd.shared.current_child.lock().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(cmd.shared.current_child.lock().is_some());

        cmd.stop();
        assert!(worker.join().unwrap());
        cmd.shared.wait_no_intr();
    }
}
