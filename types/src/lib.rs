//! Core domain types for Smithy.
//!
//! Pure data shared by the parser, the runner and the CLI: identifiers,
//! artifacts and actions, the events flowing between layers, and resolved
//! settings. No IO, no async.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod artifact;
mod event;
mod ids;
mod sanitize;
pub mod settings;

pub use artifact::{Action, ActionKind, ActionStatus, Artifact, ArtifactStatus};
pub use event::{ActionError, OutputStream, ParserEvent, RunnerEvent};
pub use ids::{ActionId, ArtifactId, ArtifactKey, MessageId, ProcessId};
pub use sanitize::sanitize_terminal_text;
pub use settings::{
    ExitCodePolicy, FailurePolicy, ParserSettings, ReadySettings, RunnerSettings,
    SchedulingPolicy, ShellSettings,
};
