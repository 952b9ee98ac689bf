// src/trigger/def.rs

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};

use crate::errors::TriggerConfigError;
use crate::query::QuerySpec;

/// Immutable, user-supplied trigger specification.
///
/// Compared by value when a trigger is re-registered under an existing
/// name: an identical definition is a no-op (preserving the old trigger's
/// run clock), a different one stops the old instance and replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    /// Unique key within a root. Filled from the section name when loaded
    /// from configuration.
    #[serde(default)]
    pub name: String,

    /// What changed paths this trigger cares about.
    #[serde(default)]
    pub expression: QuerySpec,

    /// Base argv; must be non-empty.
    pub command: Vec<String>,

    /// Append each matched (deduplicated) file path as trailing argv
    /// entries.
    #[serde(default)]
    pub append_files: bool,

    /// Stdin mode: absent = null device, `"/dev/null"`, `"NAME_PER_LINE"`,
    /// or an array of record field names for one JSON object per record.
    #[serde(default)]
    pub stdin: Option<StdinSpec>,

    /// Cap on records fed to stdin; 0 = unlimited. Negative is rejected.
    #[serde(default)]
    pub max_files_stdin: i64,

    /// Stdout redirection: `>path` truncates, `>>path` appends, absent is
    /// the null device. Any other prefix is a configuration error.
    #[serde(default)]
    pub stdout: Option<String>,

    /// Stderr redirection, same syntax as `stdout`.
    #[serde(default)]
    pub stderr: Option<String>,
}

/// Raw stdin specification as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StdinSpec {
    Mode(String),
    Fields(Vec<String>),
}

/// Validated stdin behavior.
#[derive(Debug, Clone, PartialEq)]
pub enum StdinStyle {
    DevNull,
    NamePerLine,
    /// One JSON object per matched record, restricted to these fields.
    Json(Vec<RecordField>),
}

/// Fields a JSON stdin record may carry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordField {
    Name,
    Exists,
}

impl RecordField {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "name" => Some(RecordField::Name),
            "exists" => Some(RecordField::Exists),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::Name => "name",
            RecordField::Exists => "exists",
        }
    }
}

pub fn parse_stdin_spec(spec: Option<&StdinSpec>) -> Result<StdinStyle, TriggerConfigError> {
    match spec {
        None => Ok(StdinStyle::DevNull),
        Some(StdinSpec::Mode(mode)) => match mode.as_str() {
            "/dev/null" => Ok(StdinStyle::DevNull),
            "NAME_PER_LINE" => Ok(StdinStyle::NamePerLine),
            other => Err(TriggerConfigError::InvalidStdin(other.to_string())),
        },
        Some(StdinSpec::Fields(fields)) => {
            let mut parsed = Vec::with_capacity(fields.len());
            for field in fields {
                let field = RecordField::parse(field)
                    .ok_or_else(|| TriggerConfigError::InvalidStdin(field.clone()))?;
                parsed.push(field);
            }
            if parsed.is_empty() {
                return Err(TriggerConfigError::InvalidStdin("[]".to_string()));
            }
            Ok(StdinStyle::Json(parsed))
        }
    }
}

/// Where a child stream goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Redirect {
    Null,
    Truncate(PathBuf),
    Append(PathBuf),
}

impl Redirect {
    /// Anchor a relative destination under `base` (the watch root). The
    /// file is opened in this process, so the child's working directory
    /// must not influence where it lands.
    pub fn rebase(self, base: &Path) -> Self {
        match self {
            Redirect::Truncate(p) if p.is_relative() => Redirect::Truncate(base.join(p)),
            Redirect::Append(p) if p.is_relative() => Redirect::Append(base.join(p)),
            other => other,
        }
    }

    /// Open the destination as a `Stdio`.
    pub fn open(&self) -> std::io::Result<Stdio> {
        match self {
            Redirect::Null => Ok(Stdio::null()),
            Redirect::Truncate(path) => Ok(File::create(path)?.into()),
            Redirect::Append(path) => {
                Ok(OpenOptions::new().create(true).append(true).open(path)?.into())
            }
        }
    }
}

/// Parse a redirection spec: absent selects the null device, a leading `>`
/// truncate-open, `>>` append-open. Anything else is rejected. Append mode
/// is not available on Windows, matching the underlying open flags.
pub fn parse_redirection(
    label: &str,
    spec: Option<&str>,
) -> Result<Redirect, TriggerConfigError> {
    let Some(spec) = spec else {
        return Ok(Redirect::Null);
    };

    if let Some(rest) = spec.strip_prefix(">>") {
        if cfg!(windows) {
            return Err(TriggerConfigError::AppendUnsupported);
        }
        return Ok(Redirect::Append(PathBuf::from(rest)));
    }
    if let Some(rest) = spec.strip_prefix('>') {
        return Ok(Redirect::Truncate(PathBuf::from(rest)));
    }
    Err(TriggerConfigError::BadRedirect {
        label: label.to_string(),
        value: spec.to_string(),
    })
}
