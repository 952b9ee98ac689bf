// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::trigger::TriggerDefinition;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [settings]
/// settle_ms = 20
/// watcher = "auto"
/// ignore_dirs = ["target", "node_modules"]
///
/// [trigger.build]
/// expression = { include = ["src/**"], exclude = ["src/**/*.tmp"] }
/// command = ["make"]
/// append_files = true
/// stdout = ">build.log"
/// ```
///
/// All sections are optional; a config with no triggers is legal (they can
/// also be registered at runtime).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    /// Root-wide behaviour from `[settings]`.
    #[serde(default)]
    pub settings: Settings,

    /// All triggers from `[trigger.<name>]`.
    ///
    /// Keys are the trigger names; the loader copies each key into its
    /// definition's `name` field.
    #[serde(default)]
    pub trigger: BTreeMap<String, TriggerDefinition>,
}

/// `[settings]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Quiet interval, in milliseconds, before the root reports settled.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Watcher backend name, or `"auto"` to pick by priority.
    #[serde(default)]
    pub watcher: Option<String>,

    /// Directories (relative to the root) to ignore entirely.
    #[serde(default)]
    pub ignore_dirs: Vec<String>,

    /// VCS directory names: events beneath them are ignored, and the first
    /// one that exists hosts the sync cookies.
    #[serde(default = "default_ignore_vcs")]
    pub ignore_vcs: Vec<String>,

    /// Exported to trigger children as `VIGIL_SOCK`.
    #[serde(default)]
    pub sock_path: Option<PathBuf>,
}

fn default_settle_ms() -> u64 {
    20
}

fn default_ignore_vcs() -> Vec<String> {
    vec![".git".to_string(), ".svn".to_string(), ".hg".to_string()]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            watcher: None,
            ignore_dirs: Vec::new(),
            ignore_vcs: default_ignore_vcs(),
            sock_path: None,
        }
    }
}
