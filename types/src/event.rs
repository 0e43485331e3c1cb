//! Events flowing out of the parser and the runner.

use serde::Serialize;
use thiserror::Error;

use crate::{Action, ActionId, ActionKind, Artifact, ArtifactKey};

/// Structural events fired by the message parser, each exactly once per
/// artifact/action per message, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserEvent {
    ArtifactOpened(Artifact),
    ArtifactClosed(Artifact),
    ActionOpened(Action),
    ActionClosed(Action),
}

/// Which process stream an output chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Why an action failed. Recorded on the action and reported upward.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ActionError {
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
    #[error("path escapes the workspace root: {path}")]
    PathOutsideRoot { path: String },
    #[error("failed to spawn `{command}`: {message}")]
    Spawn { command: String, message: String },
    #[error("command exited with status {}", display_code(.code))]
    ExitStatus { code: Option<i32> },
    #[error("execution environment error: {message}")]
    Environment { message: String },
}

#[allow(clippy::ref_option)]
fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "unknown (signal)".to_string(), |c| c.to_string())
}

/// Status updates pushed by the action runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunnerEvent {
    /// Registered as pending (open tag seen, content still streaming).
    ActionQueued {
        key: ArtifactKey,
        action: ActionId,
        kind: ActionKind,
    },
    ActionStarted {
        key: ArtifactKey,
        action: ActionId,
    },
    /// `ready` is true when a shell action completed through a ready signal
    /// rather than by exiting; its process is still alive.
    ActionCompleted {
        key: ArtifactKey,
        action: ActionId,
        exit_code: Option<i32>,
        ready: bool,
    },
    ActionFailed {
        key: ArtifactKey,
        action: ActionId,
        kind: ActionKind,
        error: ActionError,
    },
    ActionSkipped {
        key: ArtifactKey,
        action: ActionId,
    },
    /// Sanitized process output.
    Output {
        key: ArtifactKey,
        action: ActionId,
        stream: OutputStream,
        chunk: String,
    },
    /// A process that had already completed its action (ready signal) exited.
    ProcessExited {
        key: ArtifactKey,
        action: ActionId,
        exit_code: Option<i32>,
    },
}

impl RunnerEvent {
    #[must_use]
    pub fn key(&self) -> &ArtifactKey {
        match self {
            RunnerEvent::ActionQueued { key, .. }
            | RunnerEvent::ActionStarted { key, .. }
            | RunnerEvent::ActionCompleted { key, .. }
            | RunnerEvent::ActionFailed { key, .. }
            | RunnerEvent::ActionSkipped { key, .. }
            | RunnerEvent::Output { key, .. }
            | RunnerEvent::ProcessExited { key, .. } => key,
        }
    }

    /// The action this event refers to.
    #[must_use]
    pub fn action(&self) -> &ActionId {
        match self {
            RunnerEvent::ActionQueued { action, .. }
            | RunnerEvent::ActionStarted { action, .. }
            | RunnerEvent::ActionCompleted { action, .. }
            | RunnerEvent::ActionFailed { action, .. }
            | RunnerEvent::ActionSkipped { action, .. }
            | RunnerEvent::Output { action, .. }
            | RunnerEvent::ProcessExited { action, .. } => action,
        }
    }
}
