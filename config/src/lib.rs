//! Configuration loading for Smithy.
//!
//! `~/.smithy/config.toml` is parsed into private raw structs and resolved
//! into `smithy-types` settings here, so the rest of the workspace never sees
//! optional TOML fields.

use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::Deserialize;
use smithy_types::{
    ExitCodePolicy, FailurePolicy, ParserSettings, ReadySettings, RunnerSettings,
    SchedulingPolicy, ShellSettings,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    workspace: Option<RawWorkspace>,
    parser: Option<RawParser>,
    runner: Option<RawRunner>,
    shell: Option<RawShell>,
    ready: Option<RawReady>,
}

#[derive(Debug, Default, Deserialize)]
struct RawWorkspace {
    root: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawParser {
    /// Render-stream text for an opened artifact; `{id}` and `{title}` are
    /// substituted.
    placeholder: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRunner {
    scheduling: Option<SchedulingPolicy>,
    failure_policy: Option<FailurePolicy>,
    exit_code: Option<ExitCodePolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct RawShell {
    binary: Option<String>,
    args: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawReady {
    #[serde(default)]
    patterns: Vec<String>,
    include_defaults: Option<bool>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmithyConfig {
    /// Directory actions run in. `None` leaves the choice to the caller.
    pub workspace_root: Option<PathBuf>,
    pub parser: ParserSettings,
    pub runner: RunnerSettings,
    pub shell: ShellSettings,
    pub ready: ReadySettings,
}

impl SmithyConfig {
    /// Load from the default location. A missing file is not an error.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    /// Load from an explicit path. `Ok(None)` when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match Self::from_toml(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Parse and resolve TOML text.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let raw: RawConfig = toml::from_str(content)?;
        Ok(Self::resolve(raw))
    }

    fn resolve(raw: RawConfig) -> Self {
        let workspace = raw.workspace.unwrap_or_default();
        let parser = raw.parser.unwrap_or_default();
        let runner = raw.runner.unwrap_or_default();
        let shell = raw.shell.unwrap_or_default();
        let ready = raw.ready.unwrap_or_default();

        Self {
            workspace_root: workspace
                .root
                .map(|root| PathBuf::from(expand_env_vars(&root))),
            parser: ParserSettings {
                placeholder: parser.placeholder.map(|p| expand_env_vars(&p)),
            },
            runner: RunnerSettings {
                scheduling: runner.scheduling.unwrap_or_default(),
                failure: runner.failure_policy.unwrap_or_default(),
                exit_code: runner.exit_code.unwrap_or_default(),
            },
            shell: ShellSettings {
                binary: shell
                    .binary
                    .map(|b| expand_env_vars(&b))
                    .filter(|b| !b.trim().is_empty()),
                args: shell
                    .args
                    .map(|args| args.iter().map(|a| expand_env_vars(a)).collect()),
            },
            ready: ReadySettings {
                patterns: ready.patterns.iter().map(|p| expand_env_vars(p)).collect(),
                include_defaults: ready.include_defaults.unwrap_or(true),
            },
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

/// Expand `${VAR}` references. Unset variables expand to the empty string;
/// an unclosed `${` is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".smithy").join("config.toml"))
}
