//! The execution environment actions run against.

use std::future::Future;
use std::pin::Pin;

use smithy_types::{ActionError, OutputStream, ProcessId};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

/// Boxed future returned by environment operations.
pub type EnvFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, EnvError>> + Send + 'a>>;

/// Resolves to the exit code once the process exits; `None` when it was
/// terminated by a signal.
pub type ExitFut = Pin<Box<dyn Future<Output = Result<Option<i32>, EnvError>> + Send>>;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("path escapes the workspace root: {path}")]
    PathOutsideRoot { path: String },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process {0} is gone")]
    ProcessGone(ProcessId),
}

impl EnvError {
    /// Flatten into the serializable error recorded on an action.
    #[must_use]
    pub fn to_action_error(&self) -> ActionError {
        match self {
            EnvError::PathOutsideRoot { path } => ActionError::PathOutsideRoot { path: path.clone() },
            EnvError::Io { path, source } => ActionError::Io {
                path: path.clone(),
                message: source.to_string(),
            },
            EnvError::Spawn { command, source } => ActionError::Spawn {
                command: command.clone(),
                message: source.to_string(),
            },
            EnvError::ProcessGone(_) => ActionError::Environment {
                message: self.to_string(),
            },
        }
    }
}

/// One chunk of process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

/// A live process handed out by [`ExecutionEnvironment::spawn`].
pub struct SpawnedProcess {
    pub id: ProcessId,
    /// Writer to the process's stdin, if the environment provides one.
    pub input: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    /// Output in arrival order. Closes when both streams are exhausted.
    pub output: mpsc::Receiver<OutputChunk>,
    pub exit: ExitFut,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("id", &self.id)
            .field("input", &self.input.is_some())
            .finish_non_exhaustive()
    }
}

/// Filesystem and process capabilities of a sandboxed project.
///
/// Paths are relative to the environment's project root.
pub trait ExecutionEnvironment: Send + Sync + 'static {
    fn write_file<'a>(&'a self, path: &'a str, content: &'a str) -> EnvFut<'a, ()>;

    /// Create `path` and any missing parents.
    fn make_directories<'a>(&'a self, path: &'a str) -> EnvFut<'a, ()>;

    /// Remove a file or directory tree. Missing paths are not an error.
    fn remove_tree<'a>(&'a self, path: &'a str) -> EnvFut<'a, ()>;

    fn spawn<'a>(&'a self, program: &'a str, args: &'a [String]) -> EnvFut<'a, SpawnedProcess>;

    /// Terminate a process and everything it started. Killing a process
    /// that already exited succeeds.
    fn kill(&self, id: ProcessId) -> EnvFut<'_, ()>;

    /// Whether recent output shows a long-running command is ready.
    fn is_ready_signal(&self, recent_output: &str) -> bool;
}
