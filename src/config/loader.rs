// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::model::ConfigFile;
use crate::config::validate::validate_config;

/// Load a configuration file from a given path and return the raw
/// `ConfigFile`.
///
/// This only performs TOML deserialization (plus copying each trigger's
/// section key into its `name` field); it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading config file at {:?}", path))?;

    let mut config: ConfigFile =
        toml::from_str(&contents).with_context(|| format!("parsing TOML config from {:?}", path))?;

    // Trigger names live in the section header, not in the body.
    for (name, def) in config.trigger.iter_mut() {
        def.name = name.clone();
    }

    Ok(config)
}

/// Load a configuration file from path and run semantic validation over
/// every trigger definition. The recommended entry point: a config accepted
/// here will also be accepted by trigger registration at runtime.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let config = load_from_path(&path)?;
    validate_config(&config)
        .with_context(|| format!("validating config from {:?}", path.as_ref()))?;
    Ok(config)
}

/// The default config file name, resolved inside the watched root.
pub fn default_config_path(root: &Path) -> PathBuf {
    root.join("Vigil.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn trigger_names_come_from_section_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Vigil.toml");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
[settings]
settle_ms = 50

[trigger.build]
expression = {{ include = ["src/**"] }}
command = ["make"]
append_files = true

[trigger.lint]
command = ["cargo", "clippy"]
"#
        )
        .unwrap();

        let cfg = load_and_validate(&path).unwrap();
        assert_eq!(cfg.settings.settle_ms, 50);
        assert_eq!(cfg.trigger.len(), 2);
        assert_eq!(cfg.trigger["build"].name, "build");
        assert_eq!(cfg.trigger["lint"].name, "lint");
        assert!(cfg.trigger["build"].append_files);
    }

    #[test]
    fn defaults_apply_to_an_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Vigil.toml");
        fs::write(&path, "").unwrap();

        let cfg = load_and_validate(&path).unwrap();
        assert_eq!(cfg.settings.settle_ms, 20);
        assert_eq!(cfg.settings.ignore_vcs, vec![".git", ".svn", ".hg"]);
        assert!(cfg.trigger.is_empty());
    }

    #[test]
    fn bad_redirection_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Vigil.toml");
        fs::write(
            &path,
            "[trigger.build]\ncommand = [\"make\"]\nstdout = \"build.log\"\n",
        )
        .unwrap();

        let err = load_and_validate(&path).unwrap_err();
        assert!(format!("{err:#}").contains("must be prefixed with either > or >>"));
    }
}
