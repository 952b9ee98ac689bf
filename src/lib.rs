// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod ignore;
pub mod logging;
pub mod pending;
pub mod query;
pub mod root;
pub mod trigger;
pub mod watch;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::CliArgs;
use crate::config::loader::{default_config_path, load_and_validate};
use crate::config::model::ConfigFile;
use crate::root::{Root, RootOptions};
use crate::watch::WatcherRegistry;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - watcher selection and root startup
/// - trigger registration
///
/// It then blocks until the root is cancelled; in the foreground mode this
/// means until the process is terminated.
pub fn run(args: CliArgs) -> Result<()> {
    let cfg = load_config(&args)?;

    if args.dry_run {
        print_dry_run(&args, &cfg);
        return Ok(());
    }

    let settle_ms = args.settle_ms.unwrap_or(cfg.settings.settle_ms);
    let options = RootOptions {
        settle: Duration::from_millis(settle_ms),
        watcher: args.watcher.clone().or_else(|| cfg.settings.watcher.clone()),
        ignore_dirs: cfg.settings.ignore_dirs.clone(),
        ignore_vcs: cfg.settings.ignore_vcs.clone(),
        sock_path: cfg.settings.sock_path.clone(),
    };

    let registry = WatcherRegistry::with_builtin();
    let root = Root::new(&args.root, options, &registry)?;
    root.start()?;

    for def in cfg.trigger.into_values() {
        let name = def.name.clone();
        root.register_trigger(def)
            .with_context(|| format!("registering trigger '{name}'"))?;
    }

    info!(
        root = %root.path().display(),
        triggers = root.list_triggers().len(),
        clock = %root.current_clock(),
        "watching"
    );

    root.join();

    if let Some(reason) = root.failure_reason() {
        anyhow::bail!("watch failed: {reason}");
    }
    Ok(())
}

/// Load config from `--config`, or from `Vigil.toml` in the root if that
/// exists, or fall back to built-in defaults (no triggers).
fn load_config(args: &CliArgs) -> Result<ConfigFile> {
    if let Some(path) = &args.config {
        return load_and_validate(path);
    }
    let default = default_config_path(&args.root);
    if default.is_file() {
        return load_and_validate(&default);
    }
    Ok(ConfigFile::default())
}

/// Simple dry-run output: print settings and triggers.
fn print_dry_run(args: &CliArgs, cfg: &ConfigFile) {
    println!("vigil dry-run");
    println!("  root = {}", args.root.display());
    println!(
        "  settings.settle_ms = {}",
        args.settle_ms.unwrap_or(cfg.settings.settle_ms)
    );
    println!(
        "  settings.watcher = {}",
        args.watcher
            .as_deref()
            .or(cfg.settings.watcher.as_deref())
            .unwrap_or("auto")
    );
    if !cfg.settings.ignore_dirs.is_empty() {
        println!("  settings.ignore_dirs = {:?}", cfg.settings.ignore_dirs);
    }
    println!("  settings.ignore_vcs = {:?}", cfg.settings.ignore_vcs);
    println!();

    println!("triggers ({}):", cfg.trigger.len());
    for (name, def) in cfg.trigger.iter() {
        println!("  - {name}");
        println!("      command: {:?}", def.command);
        if !def.expression.include.is_empty() {
            println!("      include: {:?}", def.expression.include);
        }
        if !def.expression.exclude.is_empty() {
            println!("      exclude: {:?}", def.expression.exclude);
        }
        if def.append_files {
            println!("      append_files: true");
        }
        if let Some(stdin) = &def.stdin {
            println!("      stdin: {stdin:?}");
        }
        if def.max_files_stdin > 0 {
            println!("      max_files_stdin: {}", def.max_files_stdin);
        }
        if let Some(out) = &def.stdout {
            println!("      stdout: {out}");
        }
        if let Some(err) = &def.stderr {
            println!("      stderr: {err}");
        }
    }
}
