// src/config/validate.rs

use anyhow::{Context, Result, anyhow};

use crate::config::model::ConfigFile;
use crate::trigger::TriggerDefinition;
use crate::trigger::def::{parse_redirection, parse_stdin_spec};

/// Run semantic validation against a loaded configuration.
///
/// This checks every trigger definition the same way runtime registration
/// does:
/// - a non-empty name and command,
/// - a non-negative stdin cap,
/// - compilable include/exclude patterns,
/// - a recognised stdin mode or field list,
/// - well-formed stdout/stderr redirections.
///
/// Settings need no checking beyond what serde enforces; an unknown watcher
/// name is reported at startup where the registry can list what exists.
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    for (name, def) in cfg.trigger.iter() {
        validate_trigger(def).with_context(|| format!("in [trigger.{name}]"))?;
    }
    Ok(())
}

fn validate_trigger(def: &TriggerDefinition) -> Result<()> {
    if def.name.is_empty() {
        return Err(anyhow!("trigger name must not be empty"));
    }
    if def.command.is_empty() {
        return Err(anyhow!("command must contain at least one element"));
    }
    if def.max_files_stdin < 0 {
        return Err(anyhow!(
            "max_files_stdin must be >= 0 (got {})",
            def.max_files_stdin
        ));
    }

    def.expression.compile()?;
    parse_stdin_spec(def.stdin.as_ref())?;
    parse_redirection("stdout", def.stdout.as_deref())?;
    parse_redirection("stderr", def.stderr.as_deref())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QuerySpec;

    fn minimal(name: &str) -> TriggerDefinition {
        TriggerDefinition {
            name: name.into(),
            expression: QuerySpec::default(),
            command: vec!["true".into()],
            append_files: false,
            stdin: None,
            max_files_stdin: 0,
            stdout: None,
            stderr: None,
        }
    }

    #[test]
    fn minimal_trigger_passes() {
        let mut cfg = ConfigFile::default();
        cfg.trigger.insert("ok".into(), minimal("ok"));
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn errors_name_the_offending_section() {
        let mut cfg = ConfigFile::default();
        let mut bad = minimal("bad");
        bad.command.clear();
        cfg.trigger.insert("bad".into(), bad);

        let err = validate_config(&cfg).unwrap_err();
        assert!(format!("{err:#}").contains("[trigger.bad]"));
    }

    #[test]
    fn bad_glob_is_rejected() {
        let mut cfg = ConfigFile::default();
        let mut bad = minimal("globby");
        bad.expression = QuerySpec {
            include: vec!["src/[".into()],
            exclude: vec![],
        };
        cfg.trigger.insert("globby".into(), bad);
        assert!(validate_config(&cfg).is_err());
    }
}
