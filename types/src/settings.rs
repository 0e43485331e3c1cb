//! Resolved settings shared across crates.
//!
//! Raw TOML structs stay private in `smithy-config`; the loader resolves them
//! into these types at the parse boundary.

use serde::Deserialize;

/// How actions of *different* artifacts are scheduled. Within one artifact
/// execution is always strictly serial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    /// Artifacts run independently of each other.
    #[default]
    PerArtifact,
    /// One action at a time across the whole runner, in discovery order.
    Global,
}

/// What a failed action means for the rest of its artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Later actions still run.
    #[default]
    BestEffort,
    /// Later actions are marked skipped.
    FailFast,
}

/// How a shell command's exit status maps onto action status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCodePolicy {
    /// Exit code is recorded and reported; the action completes regardless.
    #[default]
    Informational,
    /// Non-zero exit fails the action.
    Strict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerSettings {
    pub scheduling: SchedulingPolicy,
    pub failure: FailurePolicy,
    pub exit_code: ExitCodePolicy,
}

/// Parser presentation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserSettings {
    /// Text emitted into the render stream when an artifact opens.
    /// `{id}` and `{title}` are substituted. `None` emits nothing.
    pub placeholder: Option<String>,
}

impl ParserSettings {
    #[must_use]
    pub fn render_placeholder(&self, id: &str, title: &str) -> Option<String> {
        self.placeholder
            .as_ref()
            .map(|template| template.replace("{id}", id).replace("{title}", title))
    }
}

/// Shell used to run shell actions. `None` fields fall back to detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellSettings {
    pub binary: Option<String>,
    pub args: Option<Vec<String>>,
}

/// Output patterns that mark a long-running command as ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadySettings {
    /// Extra regexes matched against recent process output.
    pub patterns: Vec<String>,
    /// Also apply the built-in patterns (interactive prompt marker, common
    /// dev-server banners).
    pub include_defaults: bool,
}

impl Default for ReadySettings {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            include_defaults: true,
        }
    }
}
