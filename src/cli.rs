// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `vigil`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "vigil",
    version,
    about = "Watch a directory tree and run commands when changes settle.",
    long_about = None
)]
pub struct CliArgs {
    /// The directory to watch.
    #[arg(value_name = "ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Path to the config file (TOML).
    ///
    /// Default: `Vigil.toml` inside the watched root, if it exists.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Quiet interval, in milliseconds, before changes are reported as
    /// settled. Overrides the config file.
    #[arg(long, value_name = "MS")]
    pub settle_ms: Option<u64>,

    /// Watcher backend to use (e.g. "notify", "poll"), or "auto" to pick
    /// the best available. Overrides the config file.
    #[arg(long, value_name = "NAME")]
    pub watcher: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `VIGIL_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the triggers, but don't watch anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
